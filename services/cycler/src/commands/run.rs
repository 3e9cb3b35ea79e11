//! Long-running cycling session.

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;
use tracing::{error, info, warn};
use vmcycle_cycler::poller::poll_workers;
use vmcycle_cycler::provision::provision_names;
use vmcycle_cycler::settings::Settings;
use vmcycle_cycler::{run_console_observer, spawn_scheduler};
use vmcycle_rotation::SuccessCriterion;

use crate::output::{print_info, print_success};

use super::provision::RENAME_SETTLE;
use super::CommandContext;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Workers started per cycle. Defaults to the last value used.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds between cycles (at least 10). Defaults to the last value used.
    #[arg(long)]
    interval: Option<u64>,

    /// Ready members required per batch: any, all, or a count.
    #[arg(long, env = "VMCYCLE_SUCCESS_CRITERION")]
    success_criterion: Option<SuccessCriterion>,

    /// Rename secondaries to this prefix before cycling.
    #[arg(long, env = "VMCYCLE_PROVISION_PREFIX")]
    provision_prefix: Option<String>,
}

impl RunArgs {
    pub async fn run(self, mut ctx: CommandContext) -> Result<()> {
        let saved = Settings::load();
        let settings = Settings {
            batch_size: self.batch_size.unwrap_or(saved.batch_size),
            cycle_interval: self.interval.unwrap_or(saved.cycle_interval),
        };
        if let Some(criterion) = self.success_criterion {
            ctx.config.scheduler.success_criterion = criterion;
        }

        if let Some(prefix) = &self.provision_prefix {
            let snapshot = poll_workers(&ctx.control, &ctx.config.poller).await;
            let report = provision_names(&ctx.controller(), &snapshot, prefix, RENAME_SETTLE).await;
            print_info(&format!(
                "Provisioned names: {} renamed, {} failed",
                report.renamed.len(),
                report.failed.len()
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (handle, events, mut scheduler) =
            spawn_scheduler(ctx.control.clone(), &ctx.config, shutdown_rx.clone()).await?;

        handle
            .start(settings.batch_size, settings.cycle_interval)
            .await
            .context("Failed to start cycling")?;
        if let Err(e) = settings.save() {
            warn!(error = %e, "Failed to save settings");
        }
        print_success(&format!(
            "Cycling {} workers, {} at a time every {}s (Ctrl+C to stop)",
            handle.pool_len(),
            settings.batch_size,
            settings.cycle_interval
        ));

        let observer = tokio::spawn(run_console_observer(events, shutdown_rx));

        let scheduler_done = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                false
            }
            result = &mut scheduler => {
                if let Err(e) = result {
                    error!(error = %e, "Scheduler task panicked");
                }
                true
            }
        };

        let _ = shutdown_tx.send(true);

        if !scheduler_done {
            info!("Waiting for workers to stop...");
            if let Err(e) = scheduler.await {
                error!(error = %e, "Scheduler task panicked");
            }
        }

        let observed = observer.await.context("Observer task panicked")?;
        let view = observed.view(chrono::Utc::now());
        print_success(&format!(
            "Stopped after {} cycles",
            view.cycles_completed
        ));
        Ok(())
    }
}
