//! In-memory workers for testing and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use vmcycle_events::WorkerState;

use super::{WorkerAction, WorkerControl};
use crate::error::ControlError;

/// What a mock worker does after it is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootBehavior {
    /// Reports ready once `after` has elapsed since the start call.
    Ready { after: Duration },

    /// Process runs but never reports ready.
    Hang,

    /// Reports a launch error straight away.
    Error(String),
}

impl BootBehavior {
    pub fn immediate() -> Self {
        Self::Ready {
            after: Duration::ZERO,
        }
    }
}

/// A recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Control(u32, WorkerAction),
    Rename(u32, String),
}

#[derive(Debug)]
struct MockWorker {
    name: String,
    is_primary: bool,
    behavior: BootBehavior,
    started_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    workers: BTreeMap<u32, MockWorker>,
    calls: Vec<MockCall>,
    failing_controls: HashSet<(u32, WorkerAction)>,
    failing_queries: HashSet<u32>,
    failing_renames: HashSet<u32>,
    query_delay: Duration,
}

/// Mock worker manager.
#[derive(Debug, Default)]
pub struct MockControl {
    inner: Mutex<Inner>,
}

impl MockControl {
    /// An empty manager with no workers at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// A primary worker at index 0 and `count` secondaries at `1..=count`
    /// that boot immediately.
    pub fn with_workers(count: u32) -> Self {
        (1..=count).fold(Self::new().primary(0, "main"), |mock, index| {
            mock.worker(index, BootBehavior::immediate())
        })
    }

    /// Add a primary worker.
    pub fn primary(mut self, index: u32, name: &str) -> Self {
        self.inner.get_mut().workers.insert(
            index,
            MockWorker {
                name: name.to_string(),
                is_primary: true,
                behavior: BootBehavior::immediate(),
                started_at: None,
            },
        );
        self
    }

    /// Add a stopped secondary worker.
    pub fn worker(mut self, index: u32, behavior: BootBehavior) -> Self {
        self.inner.get_mut().workers.insert(
            index,
            MockWorker {
                name: format!("worker-{index}"),
                is_primary: false,
                behavior,
                started_at: None,
            },
        );
        self
    }

    /// Delay every query answer by `delay`.
    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.inner.get_mut().query_delay = delay;
        self
    }

    /// Mark a worker as already running, without recording a call.
    pub async fn set_running(&self, index: u32) {
        if let Some(worker) = self.inner.lock().await.workers.get_mut(&index) {
            worker.started_at = Some(Instant::now());
        }
    }

    /// Make `action` on `index` fail until cleared.
    pub async fn fail_control(&self, index: u32, action: WorkerAction) {
        self.inner
            .lock()
            .await
            .failing_controls
            .insert((index, action));
    }

    /// Make queries for `index` fail until cleared.
    pub async fn fail_query(&self, index: u32) {
        self.inner.lock().await.failing_queries.insert(index);
    }

    /// Make renames of `index` fail until cleared.
    pub async fn fail_rename(&self, index: u32) {
        self.inner.lock().await.failing_renames.insert(index);
    }

    pub async fn clear_failures(&self) {
        let mut inner = self.inner.lock().await;
        inner.failing_controls.clear();
        inner.failing_queries.clear();
        inner.failing_renames.clear();
    }

    /// Every control and rename call so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Control calls so far, in order.
    pub async fn control_calls(&self) -> Vec<(u32, WorkerAction)> {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Control(index, action) => Some((*index, *action)),
                MockCall::Rename(..) => None,
            })
            .collect()
    }

    /// Indices started so far, in order.
    pub async fn started(&self) -> Vec<u32> {
        self.control_calls()
            .await
            .into_iter()
            .filter(|(_, action)| *action == WorkerAction::Start)
            .map(|(index, _)| index)
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    /// Indices whose process is running.
    pub async fn running(&self) -> Vec<u32> {
        self.inner
            .lock()
            .await
            .workers
            .iter()
            .filter(|(_, w)| w.started_at.is_some())
            .map(|(index, _)| *index)
            .collect()
    }

    pub async fn name_of(&self, index: u32) -> Option<String> {
        self.inner
            .lock()
            .await
            .workers
            .get(&index)
            .map(|w| w.name.clone())
    }
}

#[async_trait]
impl WorkerControl for MockControl {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn query(&self, index: u32) -> Result<WorkerState, ControlError> {
        let delay = self.inner.lock().await.query_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let inner = self.inner.lock().await;
        if inner.failing_queries.contains(&index) {
            return Err(ControlError::Rejected("injected query failure".to_string()));
        }
        let worker = inner
            .workers
            .get(&index)
            .ok_or(ControlError::UnknownWorker(index))?;

        let mut state = WorkerState {
            is_primary: worker.is_primary,
            ..WorkerState::stopped(index, worker.name.clone())
        };
        if let Some(started_at) = worker.started_at {
            state.process_running = true;
            match &worker.behavior {
                BootBehavior::Ready { after } => state.app_ready = started_at.elapsed() >= *after,
                BootBehavior::Hang => {}
                BootBehavior::Error(message) => {
                    state.has_error = true;
                    state.error_message = Some(message.clone());
                }
            }
        }
        Ok(state)
    }

    async fn control(&self, index: u32, action: WorkerAction) -> Result<(), ControlError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(MockCall::Control(index, action));

        if inner.failing_controls.contains(&(index, action)) {
            return Err(ControlError::Rejected(format!("injected {action} failure")));
        }
        let worker = inner
            .workers
            .get_mut(&index)
            .ok_or(ControlError::UnknownWorker(index))?;

        worker.started_at = match action {
            WorkerAction::Start => Some(worker.started_at.unwrap_or_else(Instant::now)),
            WorkerAction::Stop => None,
        };
        debug!(index, %action, "Mock worker control");
        Ok(())
    }

    async fn rename(&self, index: u32, name: &str) -> Result<(), ControlError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(MockCall::Rename(index, name.to_string()));

        if inner.failing_renames.contains(&index) {
            return Err(ControlError::Rejected("injected rename failure".to_string()));
        }
        let worker = inner
            .workers
            .get_mut(&index)
            .ok_or(ControlError::UnknownWorker(index))?;
        worker.name = name.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_delay() {
        let mock = MockControl::new().worker(
            1,
            BootBehavior::Ready {
                after: Duration::from_secs(20),
            },
        );

        mock.control(1, WorkerAction::Start).await.unwrap();
        let state = mock.query(1).await.unwrap();
        assert!(state.process_running);
        assert!(!state.app_ready);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(mock.query(1).await.unwrap().app_ready);

        mock.control(1, WorkerAction::Stop).await.unwrap();
        assert_eq!(mock.query(1).await.unwrap().status_label(), "stopped");
    }

    #[tokio::test]
    async fn test_error_and_hang() {
        let mock = MockControl::new()
            .worker(1, BootBehavior::Error("boom".to_string()))
            .worker(2, BootBehavior::Hang);
        mock.control(1, WorkerAction::Start).await.unwrap();
        mock.control(2, WorkerAction::Start).await.unwrap();

        let errored = mock.query(1).await.unwrap();
        assert!(errored.has_error);
        assert_eq!(errored.error_message.as_deref(), Some("boom"));
        assert_eq!(mock.query(2).await.unwrap().status_label(), "booting");
    }

    #[tokio::test]
    async fn test_injected_failures_are_logged() {
        let mock = MockControl::with_workers(2);
        mock.fail_control(2, WorkerAction::Start).await;
        mock.fail_query(1).await;

        assert!(mock.control(2, WorkerAction::Start).await.is_err());
        assert!(mock.query(1).await.is_err());
        assert!(matches!(
            mock.query(9).await,
            Err(ControlError::UnknownWorker(9))
        ));
        assert_eq!(mock.control_calls().await, vec![(2, WorkerAction::Start)]);
        assert!(mock.running().await.is_empty());

        mock.clear_failures().await;
        mock.control(2, WorkerAction::Start).await.unwrap();
        assert_eq!(mock.running().await, vec![2]);
    }

    #[tokio::test]
    async fn test_rename() {
        let mock = MockControl::with_workers(1);
        mock.rename(1, "ROM_TEST").await.unwrap();
        assert_eq!(mock.name_of(1).await.as_deref(), Some("ROM_TEST"));
        assert!(mock.query(0).await.unwrap().is_primary);
    }
}
