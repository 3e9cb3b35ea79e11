//! Observer side: folding scheduler events into a displayable view.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::watch;
use tracing::info;
use vmcycle_events::{
    BatchRange, EventEnvelope, ProgressReport, SchedulerEvent, SchedulerPhase, WorkerSnapshot,
};

use crate::mailbox::EventReceiver;

/// Samples of running-worker counts kept for the history line.
const HISTORY_LEN: usize = 120;

/// Console refresh period.
pub const OBSERVER_TICK: Duration = Duration::from_millis(250);

/// Everything an observer has learned from the event stream.
#[derive(Debug, Clone, Default)]
pub struct ObservedState {
    epoch: u64,
    report: Option<ProgressReport>,
    last_cycle: Option<(DateTime<Utc>, BatchRange)>,
    session_cycles: u64,
    running_history: VecDeque<usize>,
    last_snapshot: Option<WorkerSnapshot>,
}

/// A rendered snapshot of [`ObservedState`] at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedView {
    pub status: String,
    pub phase: SchedulerPhase,
    pub batch_label: Option<String>,
    pub last_cycle: Option<String>,
    pub cycles_completed: u64,
    pub cycles_per_rotation: usize,
    pub progress_percent: f64,
    pub time_remaining: Option<Duration>,
    pub running: usize,
    pub peak_running: usize,
    pub workers: usize,
}

impl ObservedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn report(&self) -> Option<&ProgressReport> {
        self.report.as_ref()
    }

    /// Fold one envelope in. Envelopes older than the current epoch are ignored.
    pub fn apply(&mut self, envelope: EventEnvelope) {
        if envelope.epoch < self.epoch {
            return;
        }
        if envelope.epoch > self.epoch {
            self.epoch = envelope.epoch;
            self.last_cycle = None;
            self.session_cycles = 0;
        }

        match envelope.event {
            SchedulerEvent::Progress(report) => {
                if let Some(snapshot) = &report.snapshot {
                    self.record_snapshot(snapshot);
                }
                self.report = Some(report);
            }
            SchedulerEvent::CycleCompleted { at, range, .. } => {
                self.last_cycle = Some((at, range));
                self.session_cycles += 1;
            }
            SchedulerEvent::Reset => {
                self.last_cycle = None;
                self.session_cycles = 0;
            }
        }
    }

    fn record_snapshot(&mut self, snapshot: &WorkerSnapshot) {
        if self.last_snapshot.as_ref().map(|s| &s.workers) == Some(&snapshot.workers) {
            return;
        }
        if self.running_history.len() == HISTORY_LEN {
            self.running_history.pop_front();
        }
        self.running_history.push_back(snapshot.running_count());
        self.last_snapshot = Some(snapshot.clone());
    }

    /// Render the state as of `now`.
    pub fn view(&self, now: DateTime<Utc>) -> ObservedView {
        let Some(report) = &self.report else {
            return ObservedView {
                status: "Waiting for scheduler".to_string(),
                phase: SchedulerPhase::Idle,
                batch_label: None,
                last_cycle: None,
                cycles_completed: 0,
                cycles_per_rotation: 0,
                progress_percent: 0.0,
                time_remaining: None,
                running: 0,
                peak_running: 0,
                workers: 0,
            };
        };

        let interval = Duration::from_secs(report.cycle_interval_secs);
        let (progress_percent, time_remaining) = match report.last_batch_started_at {
            Some(started) if report.is_active => {
                let elapsed = (now - started).to_std().unwrap_or_default();
                let percent = if interval.is_zero() {
                    100.0
                } else {
                    (elapsed.as_secs_f64() / interval.as_secs_f64() * 100.0).min(100.0)
                };
                (percent, Some(interval.saturating_sub(elapsed)))
            }
            _ => (0.0, None),
        };

        let batch_label = report
            .current_batch_range
            .filter(|_| report.is_active)
            .map(|range| range.describe(report.pool_size));

        let last_cycle = self
            .last_cycle
            .map(|(at, _)| at.with_timezone(&Local).format("%H:%M:%S").to_string());

        let (running, workers) = report
            .snapshot
            .as_ref()
            .map(|s| (s.running_count(), s.len()))
            .unwrap_or((0, 0));

        ObservedView {
            status: report.status.clone(),
            phase: report.phase,
            batch_label,
            last_cycle,
            cycles_completed: report.cycles_completed.max(self.session_cycles),
            cycles_per_rotation: report.cycles_per_rotation,
            progress_percent,
            time_remaining,
            running,
            peak_running: self.running_history.iter().copied().max().unwrap_or(running),
            workers,
        }
    }
}

impl fmt::Display for ObservedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} | batch {} | cycles {} / {} | {:.0}%",
            self.phase,
            self.status,
            self.batch_label.as_deref().unwrap_or("none"),
            self.cycles_completed,
            self.cycles_per_rotation,
            self.progress_percent,
        )?;
        match self.time_remaining {
            Some(remaining) => write!(f, " ({}s left)", remaining.as_secs())?,
            None => write!(f, " (n/a)")?,
        }
        write!(
            f,
            " | running {}/{} (peak {})",
            self.running, self.workers, self.peak_running
        )?;
        if let Some(last) = &self.last_cycle {
            write!(f, " | last cycle {last}")?;
        }
        Ok(())
    }
}

/// Drain the mailbox every tick and log the view whenever it changes.
///
/// Returns the final state once shutdown is signalled or the scheduler exits.
pub async fn run_console_observer(
    mut events: EventReceiver,
    mut shutdown: watch::Receiver<bool>,
) -> ObservedState {
    let mut state = ObservedState::new();
    let mut interval = tokio::time::interval(OBSERVER_TICK);
    let mut last_line = String::new();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for envelope in events.drain() {
                    state.apply(envelope);
                }

                // Percent and seconds-left change every tick; log on the rest.
                let view = state.view(Utc::now());
                let line = format!(
                    "{}|{}|{:?}|{}",
                    view.status, view.phase, view.batch_label, view.cycles_completed
                );
                if line != last_line {
                    info!(
                        phase = %view.phase,
                        running = view.running,
                        "{view}"
                    );
                    last_line = line;
                }

                if events.is_closed() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    for envelope in events.drain() {
        state.apply(envelope);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(active: bool, started: Option<DateTime<Utc>>) -> ProgressReport {
        ProgressReport {
            phase: if active {
                SchedulerPhase::AwaitingInterval
            } else {
                SchedulerPhase::Idle
            },
            is_active: active,
            last_batch_started_at: started,
            current_batch_range: Some(BatchRange::new(4, 2)),
            rotation_cursor: 1,
            retry_pending: false,
            batch_size: 3,
            cycle_interval_secs: 60,
            cycles_completed: 2,
            cycles_per_rotation: 2,
            pool_size: 5,
            snapshot: None,
            status: "Running".to_string(),
        }
    }

    fn envelope(epoch: u64, event: SchedulerEvent) -> EventEnvelope {
        EventEnvelope::new(epoch, event)
    }

    #[test]
    fn test_progress_and_remaining() {
        let now = Utc::now();
        let started = now - chrono::Duration::seconds(15);
        let mut state = ObservedState::new();
        state.apply(envelope(1, SchedulerEvent::Progress(report(true, Some(started)))));

        let view = state.view(now);
        assert!((view.progress_percent - 25.0).abs() < 0.01);
        assert_eq!(view.time_remaining, Some(Duration::from_secs(45)));
        assert_eq!(view.batch_label.as_deref(), Some("4-5, 1-2"));
        assert_eq!(view.cycles_completed, 2);
        assert_eq!(view.cycles_per_rotation, 2);
    }

    #[test]
    fn test_progress_caps_at_hundred() {
        let now = Utc::now();
        let started = now - chrono::Duration::seconds(600);
        let mut state = ObservedState::new();
        state.apply(envelope(1, SchedulerEvent::Progress(report(true, Some(started)))));

        let view = state.view(now);
        assert_eq!(view.progress_percent, 100.0);
        assert_eq!(view.time_remaining, Some(Duration::ZERO));
    }

    #[test]
    fn test_idle_has_no_progress() {
        let mut state = ObservedState::new();
        state.apply(envelope(0, SchedulerEvent::Progress(report(false, None))));
        let view = state.view(Utc::now());
        assert_eq!(view.progress_percent, 0.0);
        assert!(view.time_remaining.is_none());
        assert!(view.batch_label.is_none());
        assert!(view.to_string().contains("(n/a)"));
    }

    #[test]
    fn test_stale_epoch_ignored_and_new_epoch_clears_cycles() {
        let mut state = ObservedState::new();
        state.apply(envelope(
            2,
            SchedulerEvent::CycleCompleted {
                at: Utc::now(),
                range: BatchRange::new(1, 2),
                members: vec![1, 2],
            },
        ));
        assert!(state.view(Utc::now()).last_cycle.is_none());

        state.apply(envelope(2, SchedulerEvent::Progress(report(true, None))));
        assert!(state.view(Utc::now()).last_cycle.is_some());

        state.apply(envelope(1, SchedulerEvent::Reset));
        assert_eq!(state.epoch(), 2);
        assert!(state.view(Utc::now()).last_cycle.is_some());

        state.apply(envelope(3, SchedulerEvent::Reset));
        assert!(state.view(Utc::now()).last_cycle.is_none());
    }
}
