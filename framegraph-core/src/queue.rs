//! Queue identity and the monotonic per-queue command counters that make
//! cross-queue dependencies comparable.

use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound on concurrently tracked queues, fixed at build time so
/// `QueueCommandIndices` can be a plain array instead of a `Vec` (it is
/// copied on every dependency comparison).
pub const MAX_QUEUES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueId(pub u8);

/// One monotonic counter per queue. A value at index `q` means "the
/// `q`-th queue has submitted/completed commands up to this index";
/// comparing two of these element-wise tells you whether one frame's
/// submission point happens-after another's.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueCommandIndices {
    values: [u64; MAX_QUEUES],
}

impl QueueCommandIndices {
    pub fn zero() -> Self {
        Self { values: [0; MAX_QUEUES] }
    }

    pub fn get(&self, queue: QueueId) -> u64 {
        self.values[queue.0 as usize]
    }

    pub fn set(&mut self, queue: QueueId, value: u64) {
        self.values[queue.0 as usize] = value;
    }

    pub fn elementwise_max(&self, other: &Self) -> Self {
        let mut out = *self;
        for i in 0..MAX_QUEUES {
            out.values[i] = out.values[i].max(other.values[i]);
        }
        out
    }

    /// True if every queue index in `self` is at least as far along as the
    /// corresponding index in `other` — i.e. a submission stamped with
    /// `other` has definitely already completed by the time `self` is
    /// observed.
    pub fn happens_after_or_equal(&self, other: &Self) -> bool {
        self.values.iter().zip(other.values.iter()).all(|(a, b)| a >= b)
    }
}

/// Process-wide last-submitted/last-completed counters for every queue,
/// updated as command buffers are submitted and as their completion
/// handlers fire. Shared via `Arc` rather than a global so tests can run
/// several independent registries in the same process.
#[derive(Default)]
pub struct QueueRegistry {
    submitted: [AtomicU64; MAX_QUEUES],
    completed: [AtomicU64; MAX_QUEUES],
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_submission_index(&self, queue: QueueId) -> u64 {
        self.submitted[queue.0 as usize].fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn mark_completed(&self, queue: QueueId, index: u64) {
        // Completion callbacks can race (a later index's callback firing
        // before an earlier one's); only move the counter forward.
        self.completed[queue.0 as usize].fetch_max(index, Ordering::AcqRel);
    }

    pub fn last_completed(&self, queue: QueueId) -> u64 {
        self.completed[queue.0 as usize].load(Ordering::Acquire)
    }

    pub fn snapshot_completed(&self) -> QueueCommandIndices {
        let mut out = QueueCommandIndices::zero();
        for i in 0..MAX_QUEUES {
            out.values[i] = self.completed[i].load(Ordering::Acquire);
        }
        out
    }

    pub fn is_complete(&self, wait: &QueueCommandIndices) -> bool {
        self.snapshot_completed().happens_after_or_equal(wait)
    }
}
