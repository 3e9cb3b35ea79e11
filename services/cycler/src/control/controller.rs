//! Sequential start/stop over a set of workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::{WorkerAction, WorkerControl};
use crate::error::ControlError;

/// Per-call limits for control operations.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Upper bound on a single start/stop call.
    pub call_timeout: Duration,

    /// Pause after each call before the next one.
    pub settle: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            settle: Duration::from_millis(500),
        }
    }
}

/// Result of applying an action to a set of workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlOutcome {
    pub succeeded: Vec<u32>,
    pub failed: Vec<u32>,

    /// Shutdown was signalled before every index was tried.
    pub interrupted: bool,
}

impl ControlOutcome {
    pub fn any_succeeded(&self) -> bool {
        !self.succeeded.is_empty()
    }
}

/// Applies actions one worker at a time through a [`WorkerControl`].
#[derive(Clone)]
pub struct Controller {
    control: Arc<dyn WorkerControl>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(control: Arc<dyn WorkerControl>, config: ControllerConfig) -> Self {
        Self { control, config }
    }

    pub fn backend(&self) -> &Arc<dyn WorkerControl> {
        &self.control
    }

    /// Apply `action` to each index in order, stopping early on shutdown.
    pub async fn apply(
        &self,
        indices: &[u32],
        action: WorkerAction,
        shutdown: &watch::Receiver<bool>,
    ) -> ControlOutcome {
        self.run(indices, action, Some(shutdown)).await
    }

    /// Apply `action` to every index regardless of shutdown.
    pub async fn apply_all(&self, indices: &[u32], action: WorkerAction) -> ControlOutcome {
        self.run(indices, action, None).await
    }

    async fn run(
        &self,
        indices: &[u32],
        action: WorkerAction,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> ControlOutcome {
        let mut outcome = ControlOutcome::default();

        for index in indices {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                outcome.interrupted = true;
                break;
            }

            match self.call_one(*index, action).await {
                Ok(()) => {
                    debug!(index, %action, backend = self.control.name(), "Control call succeeded");
                    outcome.succeeded.push(*index);
                }
                Err(e) => {
                    warn!(
                        index,
                        %action,
                        reason = e.reason_code(),
                        error = %e,
                        "Control call failed"
                    );
                    outcome.failed.push(*index);
                }
            }

            if !self.config.settle.is_zero() {
                tokio::time::sleep(self.config.settle).await;
            }
        }

        outcome
    }

    async fn call_one(&self, index: u32, action: WorkerAction) -> Result<(), ControlError> {
        tokio::time::timeout(self.config.call_timeout, self.control.control(index, action))
            .await
            .map_err(|_| ControlError::Timeout(self.config.call_timeout))?
    }
}
