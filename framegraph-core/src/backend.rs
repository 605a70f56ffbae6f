//! The backend facade: the trait-object boundary between this
//! crate's scheduling algorithms and whatever graphics API actually
//! allocates resources and submits command buffers.
//!
//! Grounded on zangfx's `CmdQueueRef = Arc<dyn CmdQueue>` /
//! `CmdBufferRef = Box<dyn CmdBuffer>` split: a queue is a long-lived,
//! shared handle (`Arc`), a command buffer is a single-use, uniquely-owned
//! one (`Box`) that is consumed by `commit`.

use std::sync::Arc;

use smallvec::SmallVec;

use framegraph_common::AsAnySendSync;

use crate::error::Result;
use crate::pass::CommandBufferIndex;
use crate::queue::QueueId;
use crate::resource::{ResourceId, ResourceShape};

/// A resource handle as understood by the backend: opaque to this crate,
/// downcastable by the backend implementation that produced it.
pub type BackendResourceRef = Box<dyn AsAnySendSync>;

/// A per-queue GPU timeline event: a monotonic counter the GPU itself can
/// signal and wait on, used to synchronize across queues without the CPU
/// polling completion state.
pub trait QueueEvent: AsAnySendSync {
    /// Schedules a GPU-side signal of `value` once every command
    /// previously encoded on the owning queue has retired.
    fn signal(&self, value: u64);
    /// Schedules a GPU-side wait on `value` before any subsequently encoded
    /// command on the consuming queue runs.
    fn wait(&self, value: u64);
}

pub type QueueEventRef = Arc<dyn QueueEvent>;

/// Allocates and frees the concrete GPU objects a [`ResourceId`] stands
/// for. Implemented once per backend (Metal, Vulkan, a test mock); never
/// implemented by pass authors.
pub trait ResourceAllocator: Send + Sync {
    fn allocate(&self, resource: ResourceId, shape: ResourceShape) -> Result<BackendResourceRef>;

    /// Resolves a window/swapchain-backed resource to this frame's drawable.
    /// Returns [`crate::error::GraphError::WindowTextureAllocation`] if the
    /// platform surface could not produce one (e.g. the window was
    /// minimized).
    fn allocate_window_handle_texture(&self, resource: ResourceId) -> Result<BackendResourceRef>;

    fn free(&self, resource: ResourceId, handle: BackendResourceRef);

    /// Disposes of a resource backed by an aliased heap. `wait_event`, if
    /// present, must be satisfied before the heap range this resource
    /// occupied is handed to the next resource that aliases it.
    fn dispose(&self, resource: ResourceId, handle: BackendResourceRef, wait_event: Option<&QueueEventRef>) {
        let _ = wait_event;
        self.free(resource, handle);
    }

    /// Records that `resource`'s heap range will next be reusable once
    /// every command buffer in `fences` has retired. Only meaningful for
    /// [`crate::resource::ResourceFlags::ALIASED_HEAP`] resources; a
    /// non-aliasing allocator is free to no-op this.
    fn set_disposal_fences(&self, resource: ResourceId, fences: &[CommandBufferIndex]) {
        let _ = (resource, fences);
    }

    /// Blocks materialization of `resource` until every disposal fence
    /// previously set via [`Self::set_disposal_fences`] on the heap range it
    /// aliases has retired. A non-aliasing allocator has nothing to wait
    /// for and can no-op this.
    fn wait_for_heap_aliasing_fences(&self, resource: ResourceId) -> Result<()> {
        let _ = resource;
        Ok(())
    }
}

/// A single-use command buffer. Encoders are recorded into it by index
/// (the index space assigned by [`crate::frame_info::partition_frame`]);
/// once every encoder has been recorded it is committed and consumed.
pub trait CommandBuffer: AsAnySendSync {
    fn queue(&self) -> QueueId;

    /// Records one encoder's worth of commands. Called once per encoder
    /// index that this command buffer's partition range assigned to it,
    /// strictly in increasing order.
    fn begin_encoder(&mut self, encoder_index: u32) -> Result<()>;
    fn end_encoder(&mut self) -> Result<()>;

    /// Encodes a GPU-side wait on `event` reaching `value` before any
    /// subsequent encoder in this command buffer runs. Used instead of a
    /// CPU poll when the backend exposes a [`QueueEvent`] for the producer
    /// queue.
    fn wait_for_event(&mut self, event: &QueueEventRef, value: u64) -> Result<()> {
        event.wait(value);
        Ok(())
    }

    /// Encodes a GPU-side signal of `event` to `value` once this command
    /// buffer's work retires.
    fn signal_event(&mut self, event: &QueueEventRef, value: u64) -> Result<()> {
        event.signal(value);
        Ok(())
    }

    /// Schedules presentation of every window-handle texture this command
    /// buffer's encoders touched. A backend with no swapchain concept
    /// (e.g. a headless compute-only queue) can no-op this.
    fn present_swapchains(&mut self) -> Result<()> {
        Ok(())
    }

    /// Registers a callback run when the backend reports this command
    /// buffer complete. May run on an arbitrary thread; implementations
    /// must not block in it.
    fn add_completion_handler(&mut self, handler: Box<dyn FnOnce(Option<&str>) + Send>);

    /// Commits the buffer for execution. The queue-relative submission
    /// index used for cross-queue wait tokens is assigned by
    /// [`crate::queue::QueueRegistry`], not the backend — the backend only
    /// needs to run the work and eventually invoke the completion handler.
    fn commit(self: Box<Self>) -> Result<()>;
}

pub type CommandBufferRef = Box<dyn CommandBuffer>;

/// A command-submission queue. Long-lived and shared: multiple frames in
/// flight may hold a reference to the same queue simultaneously.
pub trait CommandQueue: AsAnySendSync {
    fn id(&self) -> QueueId;
    fn make_command_buffer(&self) -> Result<CommandBufferRef>;
}

pub type CommandQueueRef = Arc<dyn CommandQueue>;

/// Bundles the allocator and the queue set a [`crate::context::Context`]
/// needs; implemented once per backend and handed to the context at
/// construction.
pub trait Backend: Send + Sync {
    fn allocator(&self) -> &dyn ResourceAllocator;
    fn queue(&self, id: QueueId) -> CommandQueueRef;

    /// The GPU timeline event backing cross-queue synchronization for
    /// `queue`, if the backend exposes one. Returns `None` for a queue this
    /// backend doesn't recognize as its own (a "foreign" queue from this
    /// backend's point of view) — the context falls back to a CPU-side
    /// completion poll in that case.
    fn sync_event(&self, queue: QueueId) -> Option<QueueEventRef> {
        let _ = queue;
        None
    }
}

/// A small collection of command buffers a disposed resource's aliased
/// heap range must wait on before that range may be reused.
pub type DisposalFences = SmallVec<[CommandBufferIndex; 2]>;
