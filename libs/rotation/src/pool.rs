//! Worker pool and batch arithmetic.

use std::collections::HashSet;

use vmcycle_events::{BatchRange, WorkerSnapshot};

use crate::RotationError;

/// Ordered set of non-primary worker indices that defines rotation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPool {
    indices: Vec<u32>,
}

/// A concrete batch: the members to start and where they sit in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Cursor the batch was computed from.
    pub start_cursor: usize,

    /// Worker indices, in rotation order.
    pub members: Vec<u32>,

    /// 1-based ordinal range within the pool.
    pub range: BatchRange,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl WorkerPool {
    /// Build a pool from indices, keeping the given order.
    pub fn new(indices: Vec<u32>) -> Result<Self, RotationError> {
        if indices.is_empty() {
            return Err(RotationError::EmptyPool);
        }

        let mut seen = HashSet::with_capacity(indices.len());
        for index in &indices {
            if !seen.insert(*index) {
                return Err(RotationError::DuplicateIndex(*index));
            }
        }

        Ok(Self { indices })
    }

    /// Build a pool from every non-primary worker in a snapshot, by index.
    pub fn from_snapshot(snapshot: &WorkerSnapshot) -> Result<Self, RotationError> {
        Self::new(snapshot.secondary_indices())
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Number of batches needed to start every member once.
    pub fn cycles_per_rotation(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.clamp(1, self.len());
        self.len().div_ceil(batch_size)
    }

    /// Advance a cursor by `step` positions, wrapping.
    pub fn advance(&self, cursor: usize, step: usize) -> usize {
        (cursor + step) % self.len()
    }

    /// The `batch_size` consecutive members starting at `cursor`, wrapping.
    ///
    /// `batch_size` is clamped to `1..=len` and `cursor` is taken modulo `len`.
    pub fn batch_at(&self, cursor: usize, batch_size: usize) -> Batch {
        let n = self.len();
        let cursor = cursor % n;
        let batch_size = batch_size.clamp(1, n);

        let members = (0..batch_size)
            .map(|offset| self.indices[(cursor + offset) % n])
            .collect();
        let range = BatchRange::new(cursor + 1, ((cursor + batch_size - 1) % n) + 1);

        Batch {
            start_cursor: cursor,
            members,
            range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;
    use vmcycle_events::WorkerState;

    fn pool(n: u32) -> WorkerPool {
        WorkerPool::new((10..10 + n).collect()).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert_eq!(WorkerPool::new(vec![]), Err(RotationError::EmptyPool));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        assert_eq!(
            WorkerPool::new(vec![1, 2, 1]),
            Err(RotationError::DuplicateIndex(1))
        );
    }

    #[test]
    fn test_from_snapshot_excludes_primary() {
        let mut primary = WorkerState::stopped(0, "main");
        primary.is_primary = true;
        let snapshot = WorkerSnapshot::new(
            Utc::now(),
            vec![WorkerState::stopped(2, "b"), primary, WorkerState::stopped(1, "a")],
        );

        let pool = WorkerPool::from_snapshot(&snapshot).unwrap();
        assert_eq!(pool.indices(), &[1, 2]);
    }

    #[test]
    fn test_wrapped_range_pool_of_five() {
        let batch = pool(5).batch_at(3, 3);
        assert_eq!(batch.range, BatchRange::new(4, 2));
        assert!(batch.range.wraps());
        assert_eq!(batch.members, vec![13, 14, 10]);
    }

    #[rstest]
    #[case(0, 2, vec![10, 11], (1, 2))]
    #[case(2, 2, vec![12, 13], (3, 4))]
    #[case(4, 2, vec![14, 10], (5, 1))]
    #[case(1, 2, vec![11, 12], (2, 3))]
    #[case(0, 5, vec![10, 11, 12, 13, 14], (1, 5))]
    #[case(4, 1, vec![14], (5, 5))]
    fn test_batch_at(
        #[case] cursor: usize,
        #[case] size: usize,
        #[case] members: Vec<u32>,
        #[case] range: (usize, usize),
    ) {
        let batch = pool(5).batch_at(cursor, size);
        assert_eq!(batch.members, members);
        assert_eq!(batch.range, BatchRange::new(range.0, range.1));
        assert_eq!(batch.start_cursor, cursor);
    }

    #[test]
    fn test_batch_size_clamped() {
        let p = pool(3);
        assert_eq!(p.batch_at(0, 0).len(), 1);
        assert_eq!(p.batch_at(0, 9).len(), 3);
    }

    #[test]
    fn test_cycles_per_rotation() {
        assert_eq!(pool(5).cycles_per_rotation(2), 3);
        assert_eq!(pool(4).cycles_per_rotation(2), 2);
        assert_eq!(pool(1).cycles_per_rotation(1), 1);
    }
}
