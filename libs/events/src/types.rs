//! Worker snapshots, batch ranges, commands and scheduler events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Worker State
// =============================================================================

/// Status of a single worker at the moment it was polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    /// Stable identity assigned by the worker manager.
    pub index: u32,

    /// Human-readable name.
    pub display_name: String,

    /// The management instance, never cycled.
    pub is_primary: bool,

    /// OS process is alive. Start/stop act on this.
    pub process_running: bool,

    /// Guest finished booting. Stricter than `process_running`.
    pub app_ready: bool,

    /// The worker reported a launch failure.
    pub has_error: bool,

    /// Launch failure detail, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl WorkerState {
    /// A stopped, healthy, non-primary worker.
    pub fn stopped(index: u32, display_name: impl Into<String>) -> Self {
        Self {
            index,
            display_name: display_name.into(),
            is_primary: false,
            process_running: false,
            app_ready: false,
            has_error: false,
            error_message: None,
        }
    }

    /// Short status label for listings.
    pub fn status_label(&self) -> &'static str {
        match (self.has_error, self.app_ready, self.process_running) {
            (true, _, _) => "error",
            (false, true, _) => "ready",
            (false, false, true) => "booting",
            (false, false, false) => "stopped",
        }
    }
}

/// Result of polling every worker slot at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// When the poll finished.
    pub taken_at: DateTime<Utc>,

    /// Workers that answered, sorted by index.
    pub workers: Vec<WorkerState>,
}

impl WorkerSnapshot {
    /// Build a snapshot, sorting by index and dropping duplicate indices.
    pub fn new(taken_at: DateTime<Utc>, mut workers: Vec<WorkerState>) -> Self {
        workers.sort_by_key(|w| w.index);
        workers.dedup_by_key(|w| w.index);
        Self { taken_at, workers }
    }

    /// A snapshot with no workers.
    pub fn empty() -> Self {
        Self {
            taken_at: Utc::now(),
            workers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Look up a worker by index.
    pub fn get(&self, index: u32) -> Option<&WorkerState> {
        self.workers
            .binary_search_by_key(&index, |w| w.index)
            .ok()
            .map(|pos| &self.workers[pos])
    }

    /// Indices of non-primary workers whose process is running.
    pub fn running_secondaries(&self) -> Vec<u32> {
        self.workers
            .iter()
            .filter(|w| w.process_running && !w.is_primary)
            .map(|w| w.index)
            .collect()
    }

    /// Indices of every non-primary worker, in index order.
    pub fn secondary_indices(&self) -> Vec<u32> {
        self.workers
            .iter()
            .filter(|w| !w.is_primary)
            .map(|w| w.index)
            .collect()
    }

    /// Number of workers with a running process, primary included.
    pub fn running_count(&self) -> usize {
        self.workers.iter().filter(|w| w.process_running).count()
    }
}

// =============================================================================
// Batch Range
// =============================================================================

/// 1-based inclusive ordinal positions of a batch within the worker pool.
///
/// `first > last` means the batch runs off the end of the pool and continues
/// from ordinal 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRange {
    pub first: usize,
    pub last: usize,
}

impl BatchRange {
    pub fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }

    /// True when the batch spans the end of the pool.
    pub fn wraps(&self) -> bool {
        self.last < self.first
    }

    /// Render the ordinals covered, splitting wrapped ranges in two spans.
    pub fn describe(&self, pool_len: usize) -> String {
        if self.wraps() {
            format!("{}-{}, 1-{}", self.first, pool_len, self.last)
        } else {
            format!("{}-{}", self.first, self.last)
        }
    }
}

impl fmt::Display for BatchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Commands from observers to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerCommand {
    /// Engage cycling from a clean slate.
    Start {
        batch_size: usize,
        cycle_interval_secs: u64,
    },

    /// Disengage cycling and stop every secondary worker.
    Stop,

    /// Change the cycle interval; applies at the next boundary check.
    SetInterval { seconds: u64 },

    /// Change the batch size; applies to the next batch computed.
    SetBatchSize { batch_size: usize },

    /// Restart the rotation from ordinal 1 without disengaging.
    ResetCursor,
}

impl SchedulerCommand {
    /// Whether the command discards state queued before it.
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::Stop | Self::ResetCursor)
    }
}

// =============================================================================
// Events
// =============================================================================

/// Where the scheduler's batch pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    #[default]
    Idle,
    AwaitingInterval,
    StoppingPriorBatch,
    StartingBatch,
    VerifyingBatch,
}

impl SchedulerPhase {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerPhase::Idle => "idle",
            SchedulerPhase::AwaitingInterval => "awaiting_interval",
            SchedulerPhase::StoppingPriorBatch => "stopping_prior_batch",
            SchedulerPhase::StartingBatch => "starting_batch",
            SchedulerPhase::VerifyingBatch => "verifying_batch",
        };
        write!(f, "{}", s)
    }
}

/// Copy of the scheduler's state, emitted after each transition and tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub phase: SchedulerPhase,
    pub is_active: bool,
    pub last_batch_started_at: Option<DateTime<Utc>>,
    pub current_batch_range: Option<BatchRange>,
    pub rotation_cursor: usize,
    pub retry_pending: bool,
    pub batch_size: usize,
    pub cycle_interval_secs: u64,
    pub cycles_completed: u64,
    pub cycles_per_rotation: usize,
    pub pool_size: usize,
    pub snapshot: Option<WorkerSnapshot>,
    pub status: String,
}

/// Events from the scheduler to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// Current state copy.
    Progress(ProgressReport),

    /// A batch came up and the rotation advanced.
    CycleCompleted {
        at: DateTime<Utc>,
        range: BatchRange,
        members: Vec<u32>,
    },

    /// Cycling state was discarded (stop, reset or restart).
    Reset,
}

impl SchedulerEvent {
    /// Event kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerEvent::Progress(_) => "progress",
            SchedulerEvent::CycleCompleted { .. } => "cycle_completed",
            SchedulerEvent::Reset => "reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(index: u32, running: bool, primary: bool) -> WorkerState {
        WorkerState {
            process_running: running,
            is_primary: primary,
            ..WorkerState::stopped(index, format!("w{index}"))
        }
    }

    #[test]
    fn test_snapshot_sorts_and_dedups() {
        let snapshot = WorkerSnapshot::new(
            Utc::now(),
            vec![worker(3, false, false), worker(1, false, false), worker(3, true, false)],
        );
        let indices: Vec<u32> = snapshot.workers.iter().map(|w| w.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(snapshot.get(3).is_some());
        assert!(snapshot.get(2).is_none());
    }

    #[test]
    fn test_running_secondaries_skips_primary() {
        let snapshot = WorkerSnapshot::new(
            Utc::now(),
            vec![worker(0, true, true), worker(1, true, false), worker(2, false, false)],
        );
        assert_eq!(snapshot.running_secondaries(), vec![1]);
        assert_eq!(snapshot.secondary_indices(), vec![1, 2]);
        assert_eq!(snapshot.running_count(), 2);
    }

    #[test]
    fn test_batch_range_wrap() {
        let range = BatchRange::new(4, 2);
        assert!(range.wraps());
        assert_eq!(range.describe(5), "4-5, 1-2");
        assert_eq!(range.to_string(), "4-2");

        let plain = BatchRange::new(1, 2);
        assert!(!plain.wraps());
        assert_eq!(plain.describe(5), "1-2");
    }

    #[test]
    fn test_status_label() {
        let mut w = WorkerState::stopped(1, "w1");
        assert_eq!(w.status_label(), "stopped");
        w.process_running = true;
        assert_eq!(w.status_label(), "booting");
        w.app_ready = true;
        assert_eq!(w.status_label(), "ready");
        w.has_error = true;
        assert_eq!(w.status_label(), "error");
    }

    #[test]
    fn test_command_serialization() {
        let cmd = SchedulerCommand::Start {
            batch_size: 2,
            cycle_interval_secs: 60,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"kind\":\"start\""));
        assert!(json.contains("\"batch_size\":2"));
        assert!(SchedulerCommand::Stop.is_reset());
        assert!(!SchedulerCommand::SetInterval { seconds: 30 }.is_reset());
        assert!(!SchedulerCommand::SetBatchSize { batch_size: 3 }.is_reset());
        let json = serde_json::to_string(&SchedulerCommand::SetBatchSize { batch_size: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"set_batch_size","batch_size":3}"#);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SchedulerPhase::VerifyingBatch.to_string(), "verifying_batch");
        assert!(!SchedulerPhase::Idle.is_active());
        assert!(SchedulerPhase::AwaitingInterval.is_active());
    }
}
