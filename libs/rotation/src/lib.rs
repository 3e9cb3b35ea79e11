//! Rotation primitives for the cycling scheduler.
//!
//! This library holds the deterministic half of the scheduler: which
//! workers form the next batch, how the rotation cursor moves, and whether
//! a started batch counts as up. Key concepts:
//!
//! - **Pool**: ordered non-primary worker indices, fixed for a session.
//! - **Batch**: `batch_size` consecutive pool members from the cursor,
//!   wrapping past the end of the pool.
//! - **Retry-once-then-advance**: a failed batch is retried once; a second
//!   failure advances the cursor anyway so the rotation never stalls.
//!
//! # Invariants
//!
//! - `0 <= rotation_cursor < pool.len()`
//! - `1 <= batch_size <= pool.len()`
//! - `cycle_interval >= MIN_CYCLE_INTERVAL`
//! - Nothing here performs I/O or reads the clock; callers pass `now`.

mod pool;
mod state;
mod verify;

use std::time::Duration;

use thiserror::Error;

pub use pool::{Batch, WorkerPool};
pub use state::{
    validate_batch_size, validate_interval, CycleSettings, CyclingState, FailureDisposition,
};
pub use verify::{evaluate_batch, BatchHealth, SuccessCriterion, VerificationFailure};

/// Shortest allowed cycle interval. Stop, settle, start and verify take
/// real time on the host.
pub const MIN_CYCLE_INTERVAL: Duration = Duration::from_secs(10);

/// Rotation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RotationError {
    /// No non-primary workers to cycle.
    #[error("worker pool is empty: no non-primary workers found")]
    EmptyPool,

    /// The same worker index appears twice.
    #[error("duplicate worker index {0} in pool")]
    DuplicateIndex(u32),

    /// Batch size outside `1..=pool_len`.
    #[error("batch size must be between 1 and {pool_len}, got {batch_size}")]
    InvalidBatchSize { batch_size: usize, pool_len: usize },

    /// Interval below the minimum.
    #[error("cycle interval must be at least {min_secs}s, got {secs}s")]
    IntervalTooShort { secs: u64, min_secs: u64 },
}
