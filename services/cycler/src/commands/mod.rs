//! CLI commands.

mod provision;
mod run;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use vmcycle_cycler::control::{self, Controller, WorkerControl};
use vmcycle_cycler::logging::{self, LogFormat};
use vmcycle_cycler::{BackendKind, Config};

use crate::output::OutputFormat;

/// cycler - keep a pool of emulator instances cycling in batches.
#[derive(Debug, Parser)]
#[command(name = "cycler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format for one-shot commands (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Worker control backend.
    #[arg(long, global = true, value_enum, env = "VMCYCLE_BACKEND")]
    backend: Option<BackendKind>,

    /// Path to the worker manager's command-line tool.
    #[arg(long, global = true, env = "VMCYCLE_MANAGER_PATH")]
    manager_path: Option<PathBuf>,

    /// Path to the automation driver (scripted backend).
    #[arg(long, global = true, env = "VMCYCLE_DRIVER")]
    driver: Option<PathBuf>,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Cycle workers until interrupted.
    Run(run::RunArgs),

    /// Poll every slot once and print worker status.
    Status,

    /// Rename secondary workers to a common prefix.
    Provision(provision::ProvisionArgs),
}

/// Shared state for command execution.
pub struct CommandContext {
    pub config: Config,
    pub control: Arc<dyn WorkerControl>,
    pub format: OutputFormat,
}

impl CommandContext {
    pub fn controller(&self) -> Controller {
        Controller::new(Arc::clone(&self.control), self.config.controller.clone())
    }
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        let mut config = Config::from_env()?;
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(path) = self.manager_path {
            config.manager_path = path;
        }
        if let Some(driver) = self.driver {
            config.driver_path = Some(driver);
        }

        logging::init(self.log_format, &config.log_level)?;
        info!(
            backend = %config.backend,
            manager_path = %config.manager_path.display(),
            "Configuration loaded"
        );

        let control = control::from_config(&config).context("Failed to set up worker control")?;
        let ctx = CommandContext {
            config,
            control,
            format,
        };

        match self.command {
            Commands::Run(args) => args.run(ctx).await,
            Commands::Status => status::run(ctx).await,
            Commands::Provision(args) => args.run(ctx).await,
        }
    }
}
