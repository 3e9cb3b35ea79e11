//! Error types for the cycler.

use std::time::Duration;

use thiserror::Error;
use vmcycle_rotation::RotationError;

/// A single query or control call against the worker manager failed.
///
/// Never fatal: a failed query drops the worker from the snapshot, a failed
/// control call lands the index in the call's failed set.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The control program could not be launched.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The control program ran and reported failure.
    #[error("command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    /// The control program's output could not be understood.
    #[error("malformed worker status: {0}")]
    Malformed(String),

    /// No worker exists at this index.
    #[error("worker {0} does not exist")]
    UnknownWorker(u32),

    /// The call did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The backend refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ControlError {
    /// Standardized reason code for logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ControlError::Spawn { .. } => "spawn_failed",
            ControlError::CommandFailed { .. } => "command_failed",
            ControlError::Malformed(_) => "malformed_status",
            ControlError::UnknownWorker(_) => "unknown_worker",
            ControlError::Timeout(_) => "timeout",
            ControlError::Rejected(_) => "rejected",
        }
    }
}

/// Errors surfaced by the scheduler's control surface.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Nothing to cycle. The only condition fatal to starting the scheduler.
    #[error("no non-primary workers found; create instances in the worker manager first")]
    EmptyPool,

    /// Batch size or interval out of bounds. The scheduler stays idle.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(RotationError),

    /// The decision loop has exited.
    #[error("scheduler is no longer running")]
    MailboxClosed,
}

impl From<RotationError> for SchedulerError {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::EmptyPool => SchedulerError::EmptyPool,
            other => SchedulerError::InvalidConfiguration(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(ControlError::UnknownWorker(3).reason_code(), "unknown_worker");
        assert_eq!(
            ControlError::Timeout(Duration::from_secs(2)).reason_code(),
            "timeout"
        );
    }

    #[test]
    fn test_rotation_error_mapping() {
        assert!(matches!(
            SchedulerError::from(RotationError::EmptyPool),
            SchedulerError::EmptyPool
        ));
        assert!(matches!(
            SchedulerError::from(RotationError::IntervalTooShort {
                secs: 5,
                min_secs: 10
            }),
            SchedulerError::InvalidConfiguration(_)
        ));
    }
}
