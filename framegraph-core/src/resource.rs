//! Resource identity, flags and per-frame usage history.
//!
//! Grounded on the `ResourceInfo`/`Resource` split in
//! `passman::info::ImageResourceInfo`/`BufferResourceInfo`: a small
//! descriptor struct plus an opaque handle, generalized here to cover the
//! full resource taxonomy the scheduler must hazard-track (buffers,
//! textures, texture views, argument buffers and buffer arrays, and the
//! ray-tracing function tables).

use bitflags::bitflags;
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::dependency::WaitToken;
use crate::queue::QueueCommandIndices;
use crate::range::ActiveRange;
use crate::usage::ResourceUsage;

new_key_type! {
    /// Stable identity for a resource across frames. Backed by a
    /// generational slot map so a persistent resource's handle stays valid
    /// (and a freed-then-reused slot is detectable) across the resource's
    /// entire lifetime, not just a single frame.
    pub struct ResourceId;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Texture,
    TextureView,
    ArgumentBuffer,
    ArgumentBufferArray,
    VisibleFunctionTable,
    IntersectionFunctionTable,
}

bitflags! {
    /// Flags fixed at resource-declaration time.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ResourceFlags: u8 {
        /// Resource outlives a single frame; not reclaimed by the
        /// transient allocator at frame end.
        const PERSISTENT        = 1 << 0;
        /// A persistent resource that is also read at the start of the
        /// frame that writes it (ping-pong/history buffers).
        const HISTORY_BUFFER    = 1 << 1;
        /// Backed by a platform window/swapchain handle; materialization
        /// is deferred until the handle is registered for this frame.
        const WINDOW_HANDLE     = 1 << 2;
        /// Once written, the contents never change again (e.g. baked
        /// lookup tables); future write-after-write hazards are
        /// unreachable by construction and are not tracked.
        const IMMUTABLE_ONCE_INITIALISED = 1 << 3;
        /// Backed by a heap shared with other resources via aliasing;
        /// disposal must wait for and publish heap-aliasing fences rather
        /// than being freed outright.
        const ALIASED_HEAP = 1 << 4;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ResourceStateFlags: u8 {
        /// At least one write to this resource has completed. Read usages
        /// of an uninitialised resource are a caller bug, flagged by
        /// [`ResourceData::debug_check_read_of_uninitialised`].
        const INITIALISED = 1 << 0;
    }
}

/// Geometry needed to resolve [`ActiveRange::Full`] into concrete bounds
/// and to decide whether two ranges can even be compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceShape {
    Buffer { length_bytes: u64 },
    Texture { mip_levels: u32, array_layers: u32 },
    /// Argument buffers and function tables don't have addressable
    /// sub-ranges: a usage either touches the whole resource or none of it.
    Opaque,
}

/// Per-resource bookkeeping the generator and context consult while
/// walking a frame's passes.
pub struct ResourceData {
    pub kind: ResourceKind,
    pub flags: ResourceFlags,
    pub state: ResourceStateFlags,
    pub shape: ResourceShape,
    /// Set for texture views and argument buffer members: the resource
    /// whose lifetime and backing allocation this one aliases.
    pub base_resource: Option<ResourceId>,
    /// Usages recorded so far this frame, in pass order. Cleared by
    /// [`ResourceData::begin_frame`] once the previous frame's commands
    /// have been generated.
    pub usages: SmallVec<[ResourceUsage; 4]>,
    pub debug_name: Option<String>,
    /// The queue and submission index of this resource's most recent write,
    /// once that write's command buffer has actually been committed.
    /// Survives [`ResourceData::begin_frame`] — it's exactly what a
    /// persistent resource's first use in the *next* frame must wait on,
    /// and it names the producer's queue directly rather than guessing at
    /// it from whichever queue happens to read it first.
    pub write_wait_index: Option<WaitToken>,
    /// Per-queue submission index of this resource's most recent read on
    /// each queue, once committed. A future write on a different queue must
    /// wait on every queue that has read it (WAR), not just the last
    /// writer (WAW).
    pub read_wait_indices: QueueCommandIndices,
}

impl ResourceData {
    pub fn new(kind: ResourceKind, flags: ResourceFlags, shape: ResourceShape) -> Self {
        ResourceData {
            kind,
            flags,
            state: ResourceStateFlags::empty(),
            shape,
            base_resource: None,
            usages: SmallVec::new(),
            debug_name: None,
            write_wait_index: None,
            read_wait_indices: QueueCommandIndices::zero(),
        }
    }

    pub fn begin_frame(&mut self) {
        self.usages.clear();
    }

    pub fn is_persistent(&self) -> bool {
        self.flags.contains(ResourceFlags::PERSISTENT)
    }

    /// Index of the last usage strictly before `before` (by position in
    /// `usages`) whose type is a write, restricted to subresources that
    /// overlap `range`. Used by the generator to find the producer a given
    /// read must wait on.
    pub fn index_of_previous_write(&self, before: usize, range: &ActiveRange) -> Option<usize> {
        self.usages[..before.min(self.usages.len())]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, u)| u.usage_type.is_write() && !u.active_range.intersection(range, &self.shape).is_empty())
            .map(|(i, _)| i)
    }

    /// Indices of every read strictly before `before` that overlaps `range`
    /// and comes after the most recent conflicting write — i.e. the set of
    /// readers a new write must wait on (plural: multiple concurrent
    /// readers can precede one writer).
    pub fn indices_of_previous_reads(&self, before: usize, range: &ActiveRange) -> SmallVec<[usize; 4]> {
        let last_write = self.index_of_previous_write(before, range);
        let lower_bound = last_write.map(|i| i + 1).unwrap_or(0);
        self.usages[lower_bound..before.min(self.usages.len())]
            .iter()
            .enumerate()
            .filter(|(_, u)| u.usage_type.is_read() && !u.active_range.intersection(range, &self.shape).is_empty())
            .map(|(i, _)| i + lower_bound)
            .collect()
    }
}
