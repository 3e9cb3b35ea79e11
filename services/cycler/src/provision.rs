//! Giving every secondary worker a name with a common prefix.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};
use vmcycle_events::WorkerSnapshot;

use crate::control::{Controller, WorkerAction};

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 4;

/// What a provisioning pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Workers stopped before renaming.
    pub stopped: Vec<u32>,

    /// Workers renamed, with their new names.
    pub renamed: Vec<(u32, String)>,

    /// Workers already carrying the prefix, and primaries.
    pub kept: Vec<u32>,

    /// Workers whose rename failed.
    pub failed: Vec<u32>,
}

/// Pick new names for secondaries whose name lacks `prefix`.
///
/// Primaries are never renamed. New names are `prefix` plus four random
/// `[A-Z0-9]` characters, unique among every existing and planned name.
pub fn plan_names<R: Rng + ?Sized>(
    snapshot: &WorkerSnapshot,
    prefix: &str,
    rng: &mut R,
) -> Vec<(u32, String)> {
    let mut used: HashSet<String> = snapshot
        .workers
        .iter()
        .map(|w| w.display_name.clone())
        .collect();

    snapshot
        .workers
        .iter()
        .filter(|w| !w.is_primary && !w.display_name.starts_with(prefix))
        .map(|w| {
            let name = loop {
                let candidate = format!("{prefix}{}", random_suffix(rng));
                if used.insert(candidate.clone()) {
                    break candidate;
                }
            };
            (w.index, name)
        })
        .collect()
}

fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// Stop running secondaries, then rename those lacking `prefix`.
///
/// Rename failures are logged and reported, never fatal.
pub async fn provision_names(
    controller: &Controller,
    snapshot: &WorkerSnapshot,
    prefix: &str,
    settle: Duration,
) -> ProvisionReport {
    let plan = plan_names(snapshot, prefix, &mut rand::rng());
    let mut report = ProvisionReport {
        kept: snapshot
            .workers
            .iter()
            .filter(|w| !plan.iter().any(|(index, _)| *index == w.index))
            .map(|w| w.index)
            .collect(),
        ..ProvisionReport::default()
    };

    if plan.is_empty() {
        info!(prefix, "All workers already carry the prefix");
        return report;
    }

    let running = snapshot.running_secondaries();
    if !running.is_empty() {
        info!(workers = ?running, "Stopping workers before renaming");
        let outcome = controller.apply_all(&running, WorkerAction::Stop).await;
        if outcome.any_succeeded() && !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        report.stopped = outcome.succeeded;
    }

    for (index, name) in plan {
        match controller.backend().rename(index, &name).await {
            Ok(()) => {
                info!(index, name = %name, "Worker renamed");
                report.renamed.push((index, name));
            }
            Err(e) => {
                warn!(index, reason = e.reason_code(), error = %e, "Rename failed");
                report.failed.push(index);
            }
        }
    }

    report
}
