//! Message passing between the decision loop and observers.
//!
//! Commands flow in over a bounded channel and are drained greedily each
//! tick. Events flow out wrapped in [`EventEnvelope`]s tagged with an epoch
//! that the scheduler bumps on every reset-like command; receivers drop
//! envelopes from older epochs.

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::warn;
use vmcycle_events::{retain_latest_epoch, EventEnvelope, SchedulerCommand, SchedulerEvent};
use vmcycle_rotation::{validate_batch_size, validate_interval, CycleSettings};

use crate::error::SchedulerError;

/// Default command channel capacity.
pub const COMMAND_CAPACITY: usize = 32;

/// Default event channel capacity.
pub const EVENT_CAPACITY: usize = 256;

// =============================================================================
// Commands
// =============================================================================

/// Cloneable control surface for a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
    pool_len: usize,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: mpsc::Sender<SchedulerCommand>, pool_len: usize) -> Self {
        Self { tx, pool_len }
    }

    /// Size of the pool the scheduler rotates over.
    pub fn pool_len(&self) -> usize {
        self.pool_len
    }

    /// Engage cycling. Invalid settings are rejected here and never reach
    /// the scheduler.
    pub async fn start(&self, batch_size: usize, cycle_interval_secs: u64) -> Result<(), SchedulerError> {
        CycleSettings::validate(batch_size, cycle_interval_secs, self.pool_len)?;
        self.send(SchedulerCommand::Start {
            batch_size,
            cycle_interval_secs,
        })
        .await
    }

    /// Disengage cycling and stop every secondary worker.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Stop).await
    }

    /// Change the interval; applies at the next boundary check.
    pub async fn update_interval(&self, seconds: u64) -> Result<(), SchedulerError> {
        validate_interval(seconds)?;
        self.send(SchedulerCommand::SetInterval { seconds }).await
    }

    /// Change the batch size. The batch being verified keeps its members;
    /// the next batch uses the new size.
    pub async fn update_batch_size(&self, batch_size: usize) -> Result<(), SchedulerError> {
        validate_batch_size(batch_size, self.pool_len)?;
        self.send(SchedulerCommand::SetBatchSize { batch_size }).await
    }

    /// Restart the rotation from ordinal 1 without disengaging.
    pub async fn reset(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::ResetCursor).await
    }

    async fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SchedulerError::MailboxClosed)
    }
}

/// Take every queued command without waiting.
pub(crate) fn drain_commands(rx: &mut mpsc::Receiver<SchedulerCommand>) -> Vec<SchedulerCommand> {
    let mut drained = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(command) => drained.push(command),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
    collapse_commands(drained)
}

/// Discard commands queued ahead of the last `Stop` in a burst.
pub fn collapse_commands(mut commands: Vec<SchedulerCommand>) -> Vec<SchedulerCommand> {
    if let Some(last_stop) = commands
        .iter()
        .rposition(|c| matches!(c, SchedulerCommand::Stop))
    {
        commands.drain(..last_stop);
    }
    commands
}

// =============================================================================
// Events
// =============================================================================

/// Scheduler side of the event channel.
#[derive(Debug)]
pub struct EventSender {
    tx: mpsc::Sender<EventEnvelope>,
    epoch: u64,
}

impl EventSender {
    /// Start a new epoch. Events emitted before this are stale.
    pub fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Send without waiting. A full mailbox drops the event.
    pub fn emit(&self, event: SchedulerEvent) {
        let kind = event.kind();
        match self.tx.try_send(EventEnvelope::new(self.epoch, event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(kind, epoch = self.epoch, "Event mailbox full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Observer side of the event channel.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<EventEnvelope>,
    latest_epoch: u64,
}

impl EventReceiver {
    /// Take every queued envelope from the newest epoch seen so far.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        let mut drained = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            drained.push(envelope);
        }
        self.keep_current(drained)
    }

    /// Wait for the next envelope, skipping stale ones. `None` once the
    /// scheduler has exited and the mailbox is empty.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            let envelope = self.rx.recv().await?;
            if envelope.epoch >= self.latest_epoch {
                self.latest_epoch = envelope.epoch;
                return Some(envelope);
            }
        }
    }

    /// Whether the scheduler has dropped its sender.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }

    fn keep_current(&mut self, drained: Vec<EventEnvelope>) -> Vec<EventEnvelope> {
        let mut kept = retain_latest_epoch(drained);
        kept.retain(|e| e.epoch >= self.latest_epoch);
        if let Some(first) = kept.first() {
            self.latest_epoch = first.epoch;
        }
        kept
    }
}

/// Create the event channel.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventSender { tx, epoch: 0 },
        EventReceiver {
            rx,
            latest_epoch: 0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(vec![], vec![])]
    #[case(
        vec![SchedulerCommand::SetInterval { seconds: 30 }, SchedulerCommand::ResetCursor],
        vec![SchedulerCommand::SetInterval { seconds: 30 }, SchedulerCommand::ResetCursor]
    )]
    #[case(
        vec![
            SchedulerCommand::Start { batch_size: 1, cycle_interval_secs: 60 },
            SchedulerCommand::Stop,
            SchedulerCommand::SetInterval { seconds: 30 },
            SchedulerCommand::Stop,
        ],
        vec![SchedulerCommand::Stop]
    )]
    #[case(
        vec![
            SchedulerCommand::Stop,
            SchedulerCommand::Start { batch_size: 2, cycle_interval_secs: 20 },
        ],
        vec![
            SchedulerCommand::Stop,
            SchedulerCommand::Start { batch_size: 2, cycle_interval_secs: 20 },
        ]
    )]
    fn test_collapse_commands(
        #[case] burst: Vec<SchedulerCommand>,
        #[case] expected: Vec<SchedulerCommand>,
    ) {
        assert_eq!(collapse_commands(burst), expected);
    }

    #[tokio::test]
    async fn test_handle_validates_before_enqueueing() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SchedulerHandle::new(tx, 5);

        assert!(matches!(
            handle.start(6, 60).await,
            Err(SchedulerError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            handle.start(2, 5).await,
            Err(SchedulerError::InvalidConfiguration(_))
        ));
        assert!(handle.update_interval(9).await.is_err());
        assert!(handle.update_batch_size(0).await.is_err());
        assert!(handle.update_batch_size(6).await.is_err());
        assert!(drain_commands(&mut rx).is_empty());

        handle.start(2, 60).await.unwrap();
        handle.update_interval(10).await.unwrap();
        handle.update_batch_size(5).await.unwrap();
        let drained = drain_commands(&mut rx);
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[2], SchedulerCommand::SetBatchSize { batch_size: 5 });
    }

    #[tokio::test]
    async fn test_closed_mailbox() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = SchedulerHandle::new(tx, 1);
        assert!(matches!(handle.stop().await, Err(SchedulerError::MailboxClosed)));
    }

    #[tokio::test]
    async fn test_receiver_discards_stale_epochs() {
        let (mut sender, mut receiver) = event_channel(16);
        sender.emit(SchedulerEvent::Reset);
        sender.emit(SchedulerEvent::Reset);
        sender.bump_epoch();
        sender.emit(SchedulerEvent::Reset);

        let drained = receiver.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].epoch, 1);
        assert!(receiver.drain().is_empty());
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_event() {
        let (sender, mut receiver) = event_channel(1);
        sender.emit(SchedulerEvent::Reset);
        sender.emit(SchedulerEvent::Reset);
        assert_eq!(receiver.drain().len(), 1);
    }
}
