//! Deciding whether a started batch came up.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use vmcycle_events::WorkerSnapshot;

/// How many batch members must report ready for the batch to count as up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuccessCriterion {
    /// At least one member ready. A single flaky worker cannot stall the
    /// rotation.
    #[default]
    AnyReady,

    /// Every member ready.
    AllReady,

    /// At least `n` members ready, capped at the batch size.
    AtLeast(usize),
}

impl SuccessCriterion {
    /// Ready members required for a batch of `batch_len`.
    pub fn required(&self, batch_len: usize) -> usize {
        let required = match self {
            SuccessCriterion::AnyReady => 1,
            SuccessCriterion::AllReady => batch_len,
            SuccessCriterion::AtLeast(n) => *n,
        };
        required.clamp(1, batch_len.max(1))
    }
}

impl FromStr for SuccessCriterion {
    type Err = String;

    /// Accepts `any`, `all`, or a positive count such as `2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "any_ready" => Ok(Self::AnyReady),
            "all" | "all_ready" => Ok(Self::AllReady),
            other => other
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(Self::AtLeast)
                .ok_or_else(|| format!("invalid success criterion '{s}' (expected any, all or a count)")),
        }
    }
}

impl fmt::Display for SuccessCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessCriterion::AnyReady => write!(f, "any"),
            SuccessCriterion::AllReady => write!(f, "all"),
            SuccessCriterion::AtLeast(n) => write!(f, "{n}"),
        }
    }
}

/// Batch status as seen in one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchHealth {
    /// Enough members are ready.
    Ready { ready: usize },

    /// Every member reports a launch error. No point waiting further.
    AllErrored,

    /// Still waiting.
    Pending {
        ready: usize,
        errored: usize,
        missing: usize,
    },
}

/// Why a batch failed verification.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// No member reached ready within the window.
    #[error("no batch member became ready within {window:?}")]
    Timeout { window: Duration },

    /// Every member reported a launch error before the window elapsed.
    #[error("every batch member reported a launch error")]
    AllMembersErrored,
}

/// Evaluate batch members against a snapshot.
///
/// Members missing from the snapshot (query failed or timed out) count as
/// neither ready nor errored, so they block the all-errored short circuit.
pub fn evaluate_batch(
    members: &[u32],
    snapshot: &WorkerSnapshot,
    criterion: SuccessCriterion,
) -> BatchHealth {
    let mut ready = 0;
    let mut errored = 0;
    let mut missing = 0;

    for index in members {
        match snapshot.get(*index) {
            Some(worker) if worker.app_ready => ready += 1,
            Some(worker) if worker.has_error => errored += 1,
            Some(_) => {}
            None => missing += 1,
        }
    }

    if !members.is_empty() && ready >= criterion.required(members.len()) {
        return BatchHealth::Ready { ready };
    }
    if !members.is_empty() && errored == members.len() {
        return BatchHealth::AllErrored;
    }
    BatchHealth::Pending {
        ready,
        errored,
        missing,
    }
}
