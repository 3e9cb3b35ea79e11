//! The cycling scheduler's decision loop.
//!
//! Each tick the loop:
//! 1. Applies queued commands (start, stop, interval or batch size change, reset)
//! 2. Refreshes the worker snapshot if the poll cadence has elapsed
//! 3. Runs a cycle if the interval boundary has been reached
//! 4. Emits a progress event
//!
//! A cycle stops whatever secondaries are running, starts the next batch and
//! waits for it to come up. A batch that fails is retried once; a second
//! failure advances the rotation anyway.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vmcycle_events::{ProgressReport, SchedulerCommand, SchedulerEvent, SchedulerPhase};
use vmcycle_rotation::{
    evaluate_batch, Batch, BatchHealth, CycleSettings, CyclingState, FailureDisposition,
    SuccessCriterion, VerificationFailure, WorkerPool,
};

use crate::config::Config;
use crate::control::{Controller, WorkerAction, WorkerControl};
use crate::error::SchedulerError;
use crate::mailbox::{
    collapse_commands, drain_commands, event_channel, EventReceiver, EventSender,
    SchedulerHandle, COMMAND_CAPACITY, EVENT_CAPACITY,
};
use crate::poller::StatePoller;

/// Decision loop timings and success threshold.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick period while cycling.
    pub active_tick: Duration,

    /// Tick period while idle.
    pub idle_tick: Duration,

    /// Wait after the clean-slate stop on start.
    pub start_settle: Duration,

    /// Wait after stopping the prior batch.
    pub cycle_settle: Duration,

    /// How long a started batch has to come up.
    pub verification_window: Duration,

    /// Re-poll period during verification.
    pub verification_poll: Duration,

    /// Ready members needed for a batch to count as up.
    pub success_criterion: SuccessCriterion,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            active_tick: Duration::from_millis(500),
            idle_tick: Duration::from_secs(1),
            start_settle: Duration::from_secs(3),
            cycle_settle: Duration::from_secs(5),
            verification_window: Duration::from_secs(90),
            verification_poll: Duration::from_secs(5),
            success_criterion: SuccessCriterion::default(),
        }
    }
}

enum Verification {
    Ready { ready: usize },
    Failed(VerificationFailure),
    /// Stop or shutdown arrived mid-verification.
    Aborted,
}

/// Owns the cycling state and drives workers through the controller.
pub struct CyclingScheduler {
    config: SchedulerConfig,
    pool: WorkerPool,
    state: CyclingState,
    phase: SchedulerPhase,
    poller: StatePoller,
    controller: Controller,
    commands: mpsc::Receiver<SchedulerCommand>,
    deferred: VecDeque<SchedulerCommand>,
    events: EventSender,
    shutdown: watch::Receiver<bool>,
    shutdown_closed: bool,
    last_started_wall: Option<DateTime<Utc>>,
    status: String,
}

/// Poll once, build the pool and spawn the decision loop.
///
/// Fails only when no non-primary worker answered the initial poll.
pub async fn spawn_scheduler(
    control: Arc<dyn WorkerControl>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<(SchedulerHandle, EventReceiver, JoinHandle<()>), SchedulerError> {
    let mut poller = StatePoller::new(Arc::clone(&control), config.poller.clone());
    let snapshot = poller.poll_now().await;

    let pool = WorkerPool::from_snapshot(&snapshot)?;
    info!(
        backend = control.name(),
        pool = ?pool.indices(),
        "Worker pool built"
    );

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (events, receiver) = event_channel(EVENT_CAPACITY);
    let handle = SchedulerHandle::new(command_tx, pool.len());

    let scheduler = CyclingScheduler {
        config: config.scheduler.clone(),
        pool,
        state: CyclingState::new(CycleSettings::default()),
        phase: SchedulerPhase::Idle,
        poller,
        controller: Controller::new(control, config.controller.clone()),
        commands: command_rx,
        deferred: VecDeque::new(),
        events,
        shutdown,
        shutdown_closed: false,
        last_started_wall: None,
        status: "Idle".to_string(),
    };

    let join = tokio::spawn(scheduler.run());
    Ok((handle, receiver, join))
}

impl CyclingScheduler {
    /// Run until shutdown, then stop every secondary worker.
    pub async fn run(mut self) {
        info!(pool_size = self.pool.len(), "Cycling scheduler started");
        self.emit_progress();

        while !self.is_shutting_down() {
            let tick = if self.state.is_active() {
                self.config.active_tick
            } else {
                self.config.idle_tick
            };

            if !self.pause(tick).await {
                break;
            }
            self.tick().await;
        }

        info!("Shutdown signal received, stopping all workers");
        self.final_stop_all().await;
        info!("Cycling scheduler stopped");
    }

    async fn tick(&mut self) {
        let mut queued: Vec<SchedulerCommand> = self.deferred.drain(..).collect();
        queued.extend(drain_commands(&mut self.commands));

        for command in collapse_commands(queued) {
            self.handle_command(command).await;
            if self.is_shutting_down() {
                return;
            }
        }

        let now = Instant::now();
        let active = self.state.is_active();
        if let Some(snapshot) = self.poller.refresh_if_due(now, active).await {
            debug!(workers = snapshot.len(), "Snapshot refreshed");
        }

        if self.state.is_cycle_due(now.into_std()) {
            self.run_cycle().await;
        } else if active {
            self.phase = SchedulerPhase::AwaitingInterval;
        }

        self.emit_progress();
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, command: SchedulerCommand) {
        debug!(?command, "Handling command");
        match command {
            SchedulerCommand::Start {
                batch_size,
                cycle_interval_secs,
            } => self.start(batch_size, cycle_interval_secs).await,
            SchedulerCommand::Stop => self.stop().await,
            SchedulerCommand::SetInterval { seconds } => match self.state.set_interval(seconds) {
                Ok(()) => info!(interval_secs = seconds, "Cycle interval updated"),
                Err(e) => warn!(error = %e, "Ignoring interval update"),
            },
            SchedulerCommand::SetBatchSize { batch_size } => {
                match self.state.set_batch_size(batch_size, self.pool.len()) {
                    Ok(()) => info!(batch_size, "Batch size updated"),
                    Err(e) => warn!(error = %e, "Ignoring batch size update"),
                }
            }
            SchedulerCommand::ResetCursor => {
                self.discard_progress();
                self.status = "Rotation reset".to_string();
                info!("Rotation reset to the first worker");
            }
        }
    }

    async fn start(&mut self, batch_size: usize, cycle_interval_secs: u64) {
        let settings = match CycleSettings::validate(batch_size, cycle_interval_secs, self.pool.len()) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Ignoring start with invalid settings");
                return;
            }
        };

        self.discard_progress();
        self.state.activate(settings);
        self.phase = SchedulerPhase::StoppingPriorBatch;
        self.status = "Starting: stopping all workers".to_string();
        self.emit_progress();
        info!(
            batch_size,
            interval_secs = cycle_interval_secs,
            "Cycling started"
        );

        if self.stop_running(self.config.start_settle).await {
            self.phase = SchedulerPhase::AwaitingInterval;
            self.status = "Running".to_string();
        }
    }

    async fn stop(&mut self) {
        let was_active = self.state.is_active();
        self.state.deactivate();
        self.discard_progress();
        self.phase = SchedulerPhase::Idle;

        if !was_active {
            self.status = "Idle".to_string();
            return;
        }

        self.status = "Stopping all workers".to_string();
        self.emit_progress();
        self.stop_running(Duration::ZERO).await;
        self.status = "Stopped".to_string();
        self.emit_progress();
        info!("Cycling stopped");
    }

    /// Drop rotation progress and start a new event epoch.
    fn discard_progress(&mut self) {
        self.state.reset();
        self.last_started_wall = None;
        let epoch = self.events.bump_epoch();
        self.events.emit(SchedulerEvent::Reset);
        debug!(epoch, "Cycling state discarded");
    }

    // =========================================================================
    // Cycle
    // =========================================================================

    async fn run_cycle(&mut self) {
        self.phase = SchedulerPhase::StoppingPriorBatch;
        self.status = "Stopping running workers".to_string();
        self.emit_progress();
        if !self.stop_running(self.config.cycle_settle).await {
            return;
        }

        let batch = self.state.next_batch(&self.pool);
        let label = batch.range.describe(self.pool.len());
        self.phase = SchedulerPhase::StartingBatch;
        self.status = format!("Starting batch {label}");
        self.emit_progress();
        info!(
            batch = %label,
            members = ?batch.members,
            cursor = self.state.rotation_cursor(),
            retry = self.state.retry_pending(),
            "Starting batch"
        );

        let outcome = self
            .controller
            .apply(&batch.members, WorkerAction::Start, &self.shutdown)
            .await;
        if outcome.interrupted {
            return;
        }
        if !outcome.any_succeeded() {
            self.record_failure(&batch, "no batch member could be started");
            return;
        }

        self.phase = SchedulerPhase::VerifyingBatch;
        self.status = format!("Verifying batch {label}");
        self.emit_progress();

        match self.verify(&batch).await {
            Verification::Ready { ready } => self.record_success(&batch, ready),
            Verification::Failed(failure) => self.record_failure(&batch, &failure.to_string()),
            Verification::Aborted => {}
        }
    }

    /// Poll and stop every running secondary, waiting `settle` if any
    /// worker was actually stopped. False if shutdown interrupted it.
    async fn stop_running(&mut self, settle: Duration) -> bool {
        let snapshot = self.poller.poll_now().await;
        let running = snapshot.running_secondaries();
        if running.is_empty() {
            debug!("No running workers to stop");
            return !self.is_shutting_down();
        }

        info!(workers = ?running, "Stopping running workers");
        let outcome = self
            .controller
            .apply(&running, WorkerAction::Stop, &self.shutdown)
            .await;
        if outcome.interrupted {
            return false;
        }
        if outcome.any_succeeded() {
            return self.pause(settle).await;
        }
        true
    }

    async fn verify(&mut self, batch: &Batch) -> Verification {
        let window = self.config.verification_window;
        let deadline = Instant::now() + window;

        loop {
            let snapshot = self.poller.poll_now().await;
            match evaluate_batch(&batch.members, &snapshot, self.config.success_criterion) {
                BatchHealth::Ready { ready } => return Verification::Ready { ready },
                BatchHealth::AllErrored => {
                    return Verification::Failed(VerificationFailure::AllMembersErrored)
                }
                BatchHealth::Pending {
                    ready,
                    errored,
                    missing,
                } => {
                    debug!(ready, errored, missing, "Batch not up yet");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Verification::Failed(VerificationFailure::Timeout { window });
            }
            self.status = format!(
                "Verifying batch {} ({}s left)",
                batch.range.describe(self.pool.len()),
                deadline.saturating_duration_since(now).as_secs()
            );
            self.emit_progress();

            let wait = self
                .config
                .verification_poll
                .min(deadline.saturating_duration_since(now));
            if !self.pause(wait).await {
                return Verification::Aborted;
            }

            let mut drained = drain_commands(&mut self.commands);
            if matches!(drained.first(), Some(SchedulerCommand::Stop)) {
                self.deferred.clear();
                self.deferred.extend(drained.drain(1..));
                self.stop().await;
                return Verification::Aborted;
            }
            self.deferred.extend(drained);
        }
    }

    /// The interval runs from the moment the batch was verified up.
    fn record_success(&mut self, batch: &Batch, ready: usize) {
        let verified_at = Instant::now();
        let verified_wall = Utc::now();
        self.state.record_success(verified_at.into_std(), &self.pool);
        self.last_started_wall = Some(verified_wall);
        self.phase = SchedulerPhase::AwaitingInterval;

        let label = batch.range.describe(self.pool.len());
        self.status = format!(
            "Batch {label} up; next cycle in {}s",
            self.state
                .time_until_due(verified_at.into_std())
                .unwrap_or_default()
                .as_secs()
        );
        info!(
            batch = %label,
            ready,
            cycles_completed = self.state.cycles_completed(),
            next_cursor = self.state.rotation_cursor(),
            "Batch verified"
        );

        self.events.emit(SchedulerEvent::CycleCompleted {
            at: verified_wall,
            range: batch.range,
            members: batch.members.clone(),
        });
    }

    fn record_failure(&mut self, batch: &Batch, reason: &str) {
        let label = batch.range.describe(self.pool.len());
        self.phase = SchedulerPhase::AwaitingInterval;

        match self.state.record_failure(&self.pool) {
            FailureDisposition::RetryOwed => {
                warn!(batch = %label, reason, "Batch failed, retrying once");
                self.status = format!("Batch {label} failed ({reason}); retrying");
            }
            FailureDisposition::Advanced => {
                warn!(
                    batch = %label,
                    reason,
                    next_cursor = self.state.rotation_cursor(),
                    "Batch failed again, advancing rotation"
                );
                self.status = format!("Batch {label} failed again ({reason}); skipping");
            }
        }
    }

    async fn final_stop_all(&mut self) {
        let snapshot = self.poller.poll_now().await;
        let running = snapshot.running_secondaries();
        if !running.is_empty() {
            let outcome = self
                .controller
                .apply_all(&running, WorkerAction::Stop)
                .await;
            if !outcome.failed.is_empty() {
                warn!(failed = ?outcome.failed, "Some workers could not be stopped");
            }
        }

        self.state.deactivate();
        self.phase = SchedulerPhase::Idle;
        self.status = "Shut down".to_string();
        self.emit_progress();
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn is_shutting_down(&self) -> bool {
        self.shutdown_closed || *self.shutdown.borrow()
    }

    /// Sleep for `duration` unless shutdown arrives first. False on shutdown.
    async fn pause(&mut self, duration: Duration) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        if !duration.is_zero() {
            let closed = tokio::select! {
                _ = tokio::time::sleep(duration) => false,
                changed = self.shutdown.changed() => changed.is_err(),
            };
            self.shutdown_closed |= closed;
        }
        !self.is_shutting_down()
    }

    fn report(&self) -> ProgressReport {
        let batch_size = self.state.batch_size();
        ProgressReport {
            phase: self.phase,
            is_active: self.state.is_active(),
            last_batch_started_at: self.last_started_wall,
            current_batch_range: self.state.current_batch_range(),
            rotation_cursor: self.state.rotation_cursor(),
            retry_pending: self.state.retry_pending(),
            batch_size,
            cycle_interval_secs: self.state.cycle_interval().as_secs(),
            cycles_completed: self.state.cycles_completed(),
            cycles_per_rotation: self.pool.cycles_per_rotation(batch_size),
            pool_size: self.pool.len(),
            snapshot: self.poller.latest().map(|s| (*s).clone()),
            status: self.status.clone(),
        }
    }

    fn emit_progress(&self) {
        self.events.emit(SchedulerEvent::Progress(self.report()));
    }
}
