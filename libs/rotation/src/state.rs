//! Cycling state: rotation cursor, retry flag and cycle timing.

use std::time::{Duration, Instant};

use vmcycle_events::BatchRange;

use crate::pool::{Batch, WorkerPool};
use crate::{RotationError, MIN_CYCLE_INTERVAL};

/// Validated batch size and cycle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    pub batch_size: usize,
    pub cycle_interval: Duration,
}

impl CycleSettings {
    /// Validate settings against a pool size.
    pub fn validate(
        batch_size: usize,
        cycle_interval_secs: u64,
        pool_len: usize,
    ) -> Result<Self, RotationError> {
        Ok(Self {
            batch_size: validate_batch_size(batch_size, pool_len)?,
            cycle_interval: validate_interval(cycle_interval_secs)?,
        })
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            cycle_interval: Duration::from_secs(60),
        }
    }
}

/// Check a batch size against a pool size: `1..=pool_len`.
pub fn validate_batch_size(batch_size: usize, pool_len: usize) -> Result<usize, RotationError> {
    if batch_size == 0 || batch_size > pool_len {
        return Err(RotationError::InvalidBatchSize {
            batch_size,
            pool_len,
        });
    }
    Ok(batch_size)
}

/// Check an interval against `MIN_CYCLE_INTERVAL`.
pub fn validate_interval(secs: u64) -> Result<Duration, RotationError> {
    if secs < MIN_CYCLE_INTERVAL.as_secs() {
        return Err(RotationError::IntervalTooShort {
            secs,
            min_secs: MIN_CYCLE_INTERVAL.as_secs(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// What a failed batch attempt does to the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// First failure: the same batch is owed one more attempt.
    RetryOwed,

    /// Retry already spent: the cursor moved past the batch.
    Advanced,
}

/// The scheduler's mutable core.
///
/// Owned by the decision loop; observers receive copies of its fields.
#[derive(Debug, Clone)]
pub struct CyclingState {
    rotation_cursor: usize,
    settings: CycleSettings,
    last_batch_started_at: Option<Instant>,
    current_batch_range: Option<BatchRange>,
    retry_pending: bool,
    is_active: bool,
    attempted_batch: Option<Batch>,
    cycles_completed: u64,
}

impl CyclingState {
    /// Idle state with the given settings.
    pub fn new(settings: CycleSettings) -> Self {
        Self {
            rotation_cursor: 0,
            settings,
            last_batch_started_at: None,
            current_batch_range: None,
            retry_pending: false,
            is_active: false,
            attempted_batch: None,
            cycles_completed: 0,
        }
    }

    pub fn rotation_cursor(&self) -> usize {
        self.rotation_cursor
    }

    pub fn batch_size(&self) -> usize {
        self.settings.batch_size
    }

    pub fn cycle_interval(&self) -> Duration {
        self.settings.cycle_interval
    }

    pub fn last_batch_started_at(&self) -> Option<Instant> {
        self.last_batch_started_at
    }

    pub fn current_batch_range(&self) -> Option<BatchRange> {
        self.current_batch_range
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Engage cycling from a clean slate.
    pub fn activate(&mut self, settings: CycleSettings) {
        self.reset();
        self.settings = settings;
        self.is_active = true;
    }

    /// Disengage cycling and discard rotation progress.
    pub fn deactivate(&mut self) {
        self.reset();
        self.is_active = false;
    }

    /// Discard rotation progress. Activity and settings are kept.
    pub fn reset(&mut self) {
        self.rotation_cursor = 0;
        self.last_batch_started_at = None;
        self.current_batch_range = None;
        self.retry_pending = false;
        self.attempted_batch = None;
        self.cycles_completed = 0;
    }

    /// Change the cycle interval. Takes effect at the next boundary check.
    pub fn set_interval(&mut self, secs: u64) -> Result<(), RotationError> {
        self.settings.cycle_interval = validate_interval(secs)?;
        Ok(())
    }

    /// Change the batch size for batches computed from now on. An owed
    /// retry still repeats the failed batch as it was.
    pub fn set_batch_size(&mut self, batch_size: usize, pool_len: usize) -> Result<(), RotationError> {
        self.settings.batch_size = validate_batch_size(batch_size, pool_len)?;
        Ok(())
    }

    /// The cycle boundary: no batch yet, or the interval has elapsed.
    pub fn is_cycle_due(&self, now: Instant) -> bool {
        if !self.is_active {
            return false;
        }
        match self.last_batch_started_at {
            None => true,
            Some(started) => now.saturating_duration_since(started) >= self.settings.cycle_interval,
        }
    }

    /// Time left until the next boundary, if a batch has started.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        let started = self.last_batch_started_at?;
        Some(
            self.settings
                .cycle_interval
                .saturating_sub(now.saturating_duration_since(started)),
        )
    }

    /// Compute the batch to start next.
    ///
    /// With a retry owed this is the failed batch again and the cursor is
    /// left alone; otherwise it is `batch_size` members from the cursor.
    pub fn next_batch(&mut self, pool: &WorkerPool) -> Batch {
        let batch = match (&self.attempted_batch, self.retry_pending) {
            (Some(previous), true) => previous.clone(),
            _ => pool.batch_at(self.rotation_cursor, self.settings.batch_size),
        };

        self.current_batch_range = Some(batch.range);
        self.attempted_batch = Some(batch.clone());
        batch
    }

    /// Record that the attempted batch came up at `now`.
    pub fn record_success(&mut self, now: Instant, pool: &WorkerPool) {
        let step = self.attempted_step();
        self.last_batch_started_at = Some(now);
        self.rotation_cursor = pool.advance(self.rotation_cursor, step);
        self.retry_pending = false;
        self.attempted_batch = None;
        self.cycles_completed += 1;
    }

    /// Record that the attempted batch failed verification.
    ///
    /// `last_batch_started_at` is left untouched so the boundary condition
    /// stays true and the next attempt runs at once.
    pub fn record_failure(&mut self, pool: &WorkerPool) -> FailureDisposition {
        if self.retry_pending {
            let step = self.attempted_step();
            self.rotation_cursor = pool.advance(self.rotation_cursor, step);
            self.retry_pending = false;
            self.attempted_batch = None;
            FailureDisposition::Advanced
        } else {
            self.retry_pending = true;
            FailureDisposition::RetryOwed
        }
    }

    fn attempted_step(&self) -> usize {
        self.attempted_batch
            .as_ref()
            .map(Batch::len)
            .unwrap_or(self.settings.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn pool(n: u32) -> WorkerPool {
        WorkerPool::new((10..10 + n).collect()).unwrap()
    }

    fn active(batch_size: usize, interval_secs: u64, pool_len: usize) -> CyclingState {
        let mut state = CyclingState::new(CycleSettings::default());
        state.activate(CycleSettings::validate(batch_size, interval_secs, pool_len).unwrap());
        state
    }

    fn gcd(a: usize, b: usize) -> usize {
        if b == 0 {
            a
        } else {
            gcd(b, a % b)
        }
    }

    #[rstest]
    #[case(0, 60, 5)]
    #[case(6, 60, 5)]
    fn test_invalid_batch_size(#[case] batch: usize, #[case] secs: u64, #[case] pool_len: usize) {
        assert!(matches!(
            CycleSettings::validate(batch, secs, pool_len),
            Err(RotationError::InvalidBatchSize { .. })
        ));
    }

    #[test]
    fn test_interval_minimum() {
        assert_eq!(
            CycleSettings::validate(1, 9, 5),
            Err(RotationError::IntervalTooShort {
                secs: 9,
                min_secs: 10
            })
        );
        assert!(CycleSettings::validate(1, 10, 5).is_ok());
    }

    #[test]
    fn test_idle_state_never_due() {
        let state = CyclingState::new(CycleSettings::default());
        assert!(!state.is_active());
        assert!(!state.is_cycle_due(Instant::now()));
    }

    #[test]
    fn test_due_when_never_started_then_after_interval() {
        let p = pool(5);
        let mut state = active(2, 60, p.len());
        let t0 = Instant::now();
        assert!(state.is_cycle_due(t0));

        state.next_batch(&p);
        state.record_success(t0, &p);
        assert!(!state.is_cycle_due(t0 + Duration::from_secs(59)));
        assert!(state.is_cycle_due(t0 + Duration::from_secs(60)));
        assert_eq!(
            state.time_until_due(t0 + Duration::from_secs(45)),
            Some(Duration::from_secs(15))
        );
    }

    #[test]
    fn test_concrete_rotation_of_five_by_two() {
        let p = WorkerPool::new(vec![10, 11, 12, 13, 14]).unwrap();
        let mut state = active(2, 60, p.len());
        let now = Instant::now();

        let expected = [
            (vec![10, 11], (1, 2), false, 2),
            (vec![12, 13], (3, 4), false, 4),
            (vec![14, 10], (5, 1), true, 1),
            (vec![11, 12], (2, 3), false, 3),
        ];

        for (members, range, wraps, cursor_after) in expected {
            let batch = state.next_batch(&p);
            assert_eq!(batch.members, members);
            assert_eq!(batch.range, BatchRange::new(range.0, range.1));
            assert_eq!(batch.range.wraps(), wraps);
            state.record_success(now, &p);
            assert_eq!(state.rotation_cursor(), cursor_after);
        }
        assert_eq!(state.cycles_completed(), 4);
    }

    #[test]
    fn test_retry_then_advance() {
        let p = pool(5);
        let mut state = active(2, 60, p.len());

        let first = state.next_batch(&p);
        assert_eq!(state.record_failure(&p), FailureDisposition::RetryOwed);
        assert!(state.retry_pending());
        assert_eq!(state.rotation_cursor(), 0);

        let retry = state.next_batch(&p);
        assert_eq!(retry, first);
        assert_eq!(state.record_failure(&p), FailureDisposition::Advanced);
        assert!(!state.retry_pending());
        assert_eq!(state.rotation_cursor(), 2);
        assert!(state.last_batch_started_at().is_none());

        let next = state.next_batch(&p);
        assert_eq!(next.members, vec![12, 13]);
    }

    #[test]
    fn test_retry_success_advances_and_clears() {
        let p = pool(5);
        let mut state = active(3, 60, p.len());
        state.next_batch(&p);
        state.record_failure(&p);

        state.next_batch(&p);
        state.record_success(Instant::now(), &p);
        assert!(!state.retry_pending());
        assert_eq!(state.rotation_cursor(), 3);
    }

    #[test]
    fn test_retry_keeps_batch_after_size_change() {
        let p = pool(5);
        let mut state = active(2, 60, p.len());
        let first = state.next_batch(&p);
        state.record_failure(&p);

        state.set_batch_size(4, p.len()).unwrap();
        assert_eq!(state.next_batch(&p), first);
        state.record_success(Instant::now(), &p);
        assert_eq!(state.rotation_cursor(), 2);
        assert_eq!(state.next_batch(&p).len(), 4);
    }

    #[test]
    fn test_deactivate_resets_everything() {
        let p = pool(5);
        let mut state = active(2, 60, p.len());
        state.next_batch(&p);
        state.record_success(Instant::now(), &p);
        state.next_batch(&p);
        state.record_failure(&p);

        state.deactivate();
        assert!(!state.is_active());
        assert_eq!(state.rotation_cursor(), 0);
        assert!(!state.retry_pending());
        assert!(state.last_batch_started_at().is_none());
        assert!(state.current_batch_range().is_none());
        assert_eq!(state.cycles_completed(), 0);
    }

    #[test]
    fn test_set_interval_validates() {
        let mut state = active(1, 60, 3);
        assert!(state.set_interval(5).is_err());
        assert_eq!(state.cycle_interval(), Duration::from_secs(60));
        state.set_interval(15).unwrap();
        assert_eq!(state.cycle_interval(), Duration::from_secs(15));
    }

    proptest! {
        #[test]
        fn prop_every_member_started_within_cycles_per_rotation(n in 1u32..25, b_seed in 0usize..25) {
            let p = pool(n);
            let b = 1 + b_seed % p.len();
            let mut state = active(b, 60, p.len());
            let mut started = std::collections::HashSet::new();

            for _ in 0..p.cycles_per_rotation(b) {
                started.extend(state.next_batch(&p).members);
                state.record_success(Instant::now(), &p);
            }
            prop_assert_eq!(started.len(), p.len());
        }

        #[test]
        fn prop_cursor_closes_after_full_rotation(n in 1u32..25, b_seed in 0usize..25) {
            let p = pool(n);
            let len = p.len();
            let b = 1 + b_seed % len;
            let mut state = active(b, 60, len);

            let cycles = len / gcd(len, b);
            for i in 0..cycles {
                state.next_batch(&p);
                state.record_success(Instant::now(), &p);
                if i + 1 < cycles {
                    prop_assert_ne!(state.rotation_cursor(), 0);
                }
            }
            prop_assert_eq!(state.rotation_cursor(), 0);
            if len % b == 0 {
                prop_assert_eq!(cycles, p.cycles_per_rotation(b));
            }
        }

        #[test]
        fn prop_cursor_stays_in_bounds(n in 1u32..25, b_seed in 0usize..25, outcomes in proptest::collection::vec(any::<bool>(), 0..60)) {
            let p = pool(n);
            let b = 1 + b_seed % p.len();
            let mut state = active(b, 60, p.len());
            for ok in outcomes {
                state.next_batch(&p);
                if ok {
                    state.record_success(Instant::now(), &p);
                } else {
                    state.record_failure(&p);
                }
                prop_assert!(state.rotation_cursor() < p.len());
            }
        }
    }
}
