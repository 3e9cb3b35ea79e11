//! Worker state polling.
//!
//! One poll queries every slot with bounded concurrency and a per-query
//! timeout. Slots that error or time out are left out of the snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::debug;
use vmcycle_events::{WorkerSnapshot, WorkerState};

use crate::control::WorkerControl;
use crate::error::ControlError;

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Slots `0..slot_count` are probed.
    pub slot_count: u32,

    /// Queries in flight at once.
    pub query_concurrency: usize,

    /// Upper bound on a single query.
    pub query_timeout: Duration,

    /// Minimum time between polls while cycling.
    pub active_cadence: Duration,

    /// Minimum time between polls while idle.
    pub idle_cadence: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            slot_count: 21,
            query_concurrency: 10,
            query_timeout: Duration::from_secs(2),
            active_cadence: Duration::from_secs(2),
            idle_cadence: Duration::from_secs(5),
        }
    }
}

/// Poll every slot once and join the results into a snapshot.
pub async fn poll_workers(control: &Arc<dyn WorkerControl>, config: &PollerConfig) -> WorkerSnapshot {
    let started = Instant::now();

    let results: Vec<(u32, Result<WorkerState, ControlError>)> = stream::iter(0..config.slot_count)
        .map(|index| {
            let control = Arc::clone(control);
            let timeout = config.query_timeout;
            async move {
                let result = tokio::time::timeout(timeout, control.query(index))
                    .await
                    .unwrap_or(Err(ControlError::Timeout(timeout)));
                (index, result)
            }
        })
        .buffer_unordered(config.query_concurrency.max(1))
        .collect()
        .await;

    let mut workers = Vec::with_capacity(results.len());
    for (index, result) in results {
        match result {
            Ok(state) => workers.push(state),
            Err(ControlError::UnknownWorker(_)) => {}
            Err(e) => debug!(index, reason = e.reason_code(), error = %e, "Worker query failed"),
        }
    }

    let snapshot = WorkerSnapshot::new(Utc::now(), workers);
    debug!(
        workers = snapshot.len(),
        running = snapshot.running_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Poll complete"
    );
    snapshot
}

/// Keeps the latest snapshot and decides when the next poll is due.
pub struct StatePoller {
    control: Arc<dyn WorkerControl>,
    config: PollerConfig,
    latest: Option<Arc<WorkerSnapshot>>,
    last_poll: Option<Instant>,
}

impl StatePoller {
    pub fn new(control: Arc<dyn WorkerControl>, config: PollerConfig) -> Self {
        Self {
            control,
            config,
            latest: None,
            last_poll: None,
        }
    }

    /// Last published snapshot.
    pub fn latest(&self) -> Option<Arc<WorkerSnapshot>> {
        self.latest.clone()
    }

    /// Whether the cadence for the current activity has elapsed.
    pub fn is_due(&self, now: Instant, active: bool) -> bool {
        let cadence = if active {
            self.config.active_cadence
        } else {
            self.config.idle_cadence
        };
        self.last_poll
            .map_or(true, |last| now.saturating_duration_since(last) >= cadence)
    }

    /// Poll if the cadence has elapsed.
    pub async fn refresh_if_due(&mut self, now: Instant, active: bool) -> Option<Arc<WorkerSnapshot>> {
        if !self.is_due(now, active) {
            return None;
        }
        Some(self.poll_now().await)
    }

    /// Poll immediately.
    pub async fn poll_now(&mut self) -> Arc<WorkerSnapshot> {
        let snapshot = Arc::new(poll_workers(&self.control, &self.config).await);
        self.last_poll = Some(Instant::now());
        self.latest = Some(Arc::clone(&snapshot));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{MockControl, WorkerAction};

    fn config(slots: u32) -> PollerConfig {
        PollerConfig {
            slot_count: slots,
            ..PollerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_poll_skips_missing_and_failed_slots() {
        let mock = Arc::new(MockControl::with_workers(4));
        mock.fail_query(2).await;
        mock.control(3, WorkerAction::Start).await.unwrap();
        let control: Arc<dyn WorkerControl> = mock;

        let snapshot = poll_workers(&control, &config(21)).await;
        let indices: Vec<u32> = snapshot.workers.iter().map(|w| w.index).collect();
        assert_eq!(indices, vec![0, 1, 3, 4]);
        assert_eq!(snapshot.running_secondaries(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_queries_time_out() {
        let mock = MockControl::with_workers(2).query_delay(Duration::from_secs(5));
        let control: Arc<dyn WorkerControl> = Arc::new(mock);

        let snapshot = poll_workers(&control, &config(3)).await;
        assert!(snapshot.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence() {
        let control: Arc<dyn WorkerControl> = Arc::new(MockControl::with_workers(1));
        let mut poller = StatePoller::new(control, config(2));
        assert!(poller.latest().is_none());

        let now = Instant::now();
        assert!(poller.refresh_if_due(now, true).await.is_some());
        assert!(poller.refresh_if_due(Instant::now(), true).await.is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(poller.is_due(Instant::now(), true));
        assert!(!poller.is_due(Instant::now(), false));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(poller.is_due(Instant::now(), false));
        assert_eq!(poller.latest().map(|s| s.len()), Some(2));
    }
}
