//! Execution core of a GPU render-graph scheduler: given a frame's declared
//! passes and the resources they touch, works out which passes must wait
//! on which, where to place memory barriers and fences, when a transient
//! resource needs to be allocated and when it can be recycled, and submits
//! the resulting command buffers in the right order across however many
//! queues the backend exposes.
//!
//! Nothing in this crate talks to a real graphics API directly — see
//! [`backend`] for the trait boundary a concrete backend implements.

pub mod backend;
pub mod context;
pub mod dependency;
pub mod end_actions;
pub mod error;
pub mod frame_info;
pub mod generator;
pub mod pass;
pub mod queue;
pub mod range;
pub mod resource;
pub mod usage;

pub use backend::{
    Backend, BackendResourceRef, CommandBuffer, CommandBufferRef, CommandQueue, CommandQueueRef, DisposalFences, QueueEvent, QueueEventRef,
    ResourceAllocator,
};
pub use context::{CompiledGraph, Context, GraphCompiler, LinearCompiler};
pub use dependency::{DependencyTable, EncoderDependency, FenceDependency, WaitToken};
pub use end_actions::{CommandEndActionManager, EndAction};
pub use error::{BoxError, GraphError, Result, SimpleError};
pub use frame_info::{partition_frame, CommandEncoderInfo, FrameCommandInfo};
pub use generator::{generate, mark_dead_passes, FrameResourceCommand, GeneratedCommands, PendingCrossQueueWait, PreFrameCommand, SortKey};
pub use pass::{CommandBufferIndex, DeclaredPass, DeclaredUsage, EncoderIndex, PassIndex, PassInstantiationContext, PassType, RenderPass, RenderPassRecord};
pub use queue::{QueueCommandIndices, QueueId, QueueRegistry, MAX_QUEUES};
pub use range::{ActiveRange, TextureRect};
pub use resource::{ResourceData, ResourceFlags, ResourceId, ResourceKind, ResourceShape, ResourceStateFlags};
pub use usage::{ResourceUsage, StageFlags, UsageType};
