//! Event envelope - the common wrapper for all scheduler events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SchedulerEvent;

/// The event envelope - ordering metadata for every scheduler event.
///
/// `epoch` increases each time the scheduler discards its cycling state
/// (stop, reset, restart). Envelopes from an older epoch describe a
/// rotation that no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Reset generation the event belongs to.
    pub epoch: u64,

    /// When the scheduler emitted the event.
    pub emitted_at: DateTime<Utc>,

    /// The event itself.
    pub event: SchedulerEvent,
}

impl EventEnvelope {
    /// Wrap an event, stamping the current time.
    pub fn new(epoch: u64, event: SchedulerEvent) -> Self {
        Self {
            epoch,
            emitted_at: Utc::now(),
            event,
        }
    }
}

/// Keep only envelopes from the newest epoch in a drained batch.
///
/// Relative order within the surviving epoch is preserved.
pub fn retain_latest_epoch(mut envelopes: Vec<EventEnvelope>) -> Vec<EventEnvelope> {
    let Some(latest) = envelopes.iter().map(|e| e.epoch).max() else {
        return envelopes;
    };
    envelopes.retain(|e| e.epoch == latest);
    envelopes
}
