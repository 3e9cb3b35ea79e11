//! Worker control interface and backends.
//!
//! Everything the scheduler does to workers goes through [`WorkerControl`]:
//! - Querying one slot's status
//! - Starting or stopping a worker
//! - Renaming a worker
//!
//! Backends:
//! - [`ManagerCli`]: the worker manager's command-line tool
//! - [`ScriptedDriver`]: an external automation driver program
//! - [`MockControl`]: in-memory workers for tests and dry runs

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use vmcycle_events::WorkerState;

use crate::config::{BackendKind, Config};
use crate::error::ControlError;

mod controller;
mod manager;
mod mock;
mod scripted;

pub use controller::{ControlOutcome, Controller, ControllerConfig};
pub use manager::ManagerCli;
pub use mock::{BootBehavior, MockCall, MockControl};
pub use scripted::ScriptedDriver;

/// Action applied to a worker's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerAction {
    Start,
    Stop,
}

impl fmt::Display for WorkerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerAction::Start => write!(f, "start"),
            WorkerAction::Stop => write!(f, "stop"),
        }
    }
}

/// Worker control interface.
#[async_trait]
pub trait WorkerControl: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Status of the worker at `index`.
    async fn query(&self, index: u32) -> Result<WorkerState, ControlError>;

    /// Start or stop the worker at `index`.
    async fn control(&self, index: u32, action: WorkerAction) -> Result<(), ControlError>;

    /// Give the worker at `index` a new display name.
    async fn rename(&self, index: u32, name: &str) -> Result<(), ControlError>;
}

/// Build the backend selected in `config`.
pub fn from_config(config: &Config) -> Result<Arc<dyn WorkerControl>, ControlError> {
    match config.backend {
        BackendKind::Manager => Ok(Arc::new(ManagerCli::new(config.manager_path.clone()))),
        BackendKind::Scripted => {
            let driver = config.driver_path.clone().ok_or_else(|| {
                ControlError::Rejected("the scripted backend needs a driver path".to_string())
            })?;
            Ok(Arc::new(ScriptedDriver::new(driver)))
        }
        BackendKind::Mock => Ok(Arc::new(MockControl::with_workers(5))),
    }
}

// =============================================================================
// Status payload shared by the command-line backends
// =============================================================================

/// Status object printed by `info`/`query` subcommands.
#[derive(Debug, Deserialize)]
pub(crate) struct StatusPayload {
    #[serde(default = "absent")]
    error_code: i64,
    #[serde(default)]
    index: Option<IndexField>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_main: bool,
    #[serde(default)]
    is_process_started: bool,
    #[serde(default)]
    is_android_started: bool,
    #[serde(default)]
    launch_err_code: i64,
    #[serde(default)]
    launch_err_msg: Option<String>,
}

fn absent() -> i64 {
    -1
}

/// The manager prints `index` as a string; drivers may print a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexField {
    Number(u32),
    Text(String),
}

impl StatusPayload {
    /// Convert the payload for the slot that was asked about.
    pub(crate) fn into_worker_state(self, requested: u32) -> Result<WorkerState, ControlError> {
        if self.error_code != 0 {
            return Err(ControlError::UnknownWorker(requested));
        }

        let index = match self.index {
            None => requested,
            Some(IndexField::Number(n)) => n,
            Some(IndexField::Text(s)) => s
                .trim()
                .parse()
                .map_err(|_| ControlError::Malformed(format!("index '{s}' is not a number")))?,
        };
        if index != requested {
            return Err(ControlError::Malformed(format!(
                "asked for worker {requested}, got {index}"
            )));
        }

        let has_error = self.launch_err_code != 0;
        let error_message = if has_error {
            Some(
                self.launch_err_msg
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("launch error {}", self.launch_err_code)),
            )
        } else {
            None
        };

        Ok(WorkerState {
            index,
            display_name: self.name.unwrap_or_else(|| format!("worker-{index}")),
            is_primary: self.is_main,
            process_running: self.is_process_started || self.is_android_started,
            app_ready: self.is_android_started,
            has_error,
            error_message,
        })
    }
}

/// Parse a status object from a command's stdout.
pub(crate) fn parse_status(stdout: &[u8], requested: u32) -> Result<WorkerState, ControlError> {
    let payload: StatusPayload = serde_json::from_slice(stdout)
        .map_err(|e| ControlError::Malformed(e.to_string()))?;
    payload.into_worker_state(requested)
}
