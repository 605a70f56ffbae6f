//! Inter-encoder and inter-command-buffer dependency edges, and the
//! cross-queue wait tokens that stand in for them once a dependency
//! crosses a command buffer or queue boundary.

use std::collections::BTreeSet;

use crate::pass::EncoderIndex;
use crate::queue::QueueId;

/// `producer` must finish before `consumer` starts. Both sides resolved to
/// encoder granularity: encoders are the finest unit the backend can order
/// independently of the other encoders sharing its command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EncoderDependency {
    pub producer: EncoderIndex,
    pub consumer: EncoderIndex,
}

/// A dependency that crosses a command-buffer boundary on the same queue:
/// resolved to a GPU fence signal/wait pair rather than an in-encoder
/// barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceDependency {
    pub signals_after_command_buffer: u32,
    pub waits_in_command_buffer: u32,
}

/// A dependency that crosses a queue boundary. The consumer's queue waits
/// for the producer queue's counter to reach `execution_index` before
/// starting — either via a GPU-side queue wait (if the backend supports
/// one) or, for a CPU-side dependent, by polling
/// [`crate::queue::QueueRegistry::is_complete`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitToken {
    pub queue: QueueId,
    pub execution_index: u64,
}

/// The full set of encoder-to-encoder edges for one frame, built by the
/// generator from overlapping resource usages and consulted by the command
/// buffer partitioner and the fence/wait-token resolution pass.
#[derive(Default)]
pub struct DependencyTable {
    edges: BTreeSet<EncoderDependency>,
}

impl DependencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dependency(&mut self, producer: EncoderIndex, consumer: EncoderIndex) {
        if producer != consumer {
            self.edges.insert(EncoderDependency { producer, consumer });
        }
    }

    pub fn dependencies_of(&self, consumer: EncoderIndex) -> impl Iterator<Item = EncoderIndex> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.consumer == consumer)
            .map(|e| e.producer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncoderDependency> {
        self.edges.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
