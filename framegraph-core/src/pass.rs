//! Pass declarations and the compiled, generator-ready pass record.
//!
//! Grounded on `passman::info::PassInfo<C>`/`ResourceUse`: a declared pass
//! carries its resource uses up front so the scheduler can build the
//! dependency table before any pass actually encodes a command. The
//! `factory`/`Pass<C>` split mirrors `PassInfo<C>::factory` and `Pass<C>`,
//! generalized to the full [`UsageType`] taxonomy and to CPU passes in
//! addition to GPU ones. Where the source crate kept `C` a type parameter
//! (its graphics context varies by backend build), this crate fixes the
//! encode target to [`crate::backend::CommandBuffer`] — the trait-object
//! facade already is the per-backend seam, so a second generic over the
//! same axis would only add indirection.

use crate::backend::CommandBuffer;
use crate::error::Result;
use crate::queue::QueueId;
use crate::range::ActiveRange;
use crate::resource::ResourceId;
use crate::usage::{StageFlags, UsageType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassType {
    Draw,
    Compute,
    Blit,
    AccelerationStructure,
    /// Runs on the CPU between two GPU passes; never emits its own
    /// commands but can still touch resources (e.g. updating a persistent
    /// buffer's contents via a CPU-visible mapping).
    Cpu,
    /// Supplied directly by the caller as an opaque platform command
    /// buffer; the generator treats it as an opaque barrier point.
    External,
}

/// One resource touch declared by a pass before it has been encoded.
#[derive(Clone, Debug)]
pub struct DeclaredUsage {
    pub resource: ResourceId,
    pub usage_type: UsageType,
    pub stages: StageFlags,
    pub active_range: ActiveRange,
}

/// Context handed to a pass's factory once its place in the schedule
/// (encoder index, command range) is known.
pub struct PassInstantiationContext {
    pub pass_index: PassIndex,
    pub encoder_index: EncoderIndex,
}

/// A user-submitted pass, not yet assigned a place in the schedule.
pub struct DeclaredPass {
    pub name: String,
    pub pass_type: PassType,
    pub queue: QueueId,
    pub resource_uses: Vec<DeclaredUsage>,
    /// Identity of the render target this pass draws into, if any. Two
    /// consecutive draw passes with the same (non-`None`) identity are
    /// merged into a single encoder rather than starting a new one.
    pub render_target: Option<u64>,
    pub factory: Box<dyn FnOnce(&PassInstantiationContext) -> Box<dyn RenderPass> + Send>,
}

/// A pass that has been assigned a slot in the schedule and knows how to
/// encode its commands against the backend's command buffer facade.
pub trait RenderPass: Send {
    fn encode(&mut self, buffer: &mut dyn CommandBuffer) -> Result<()>;
}

/// Index of a pass within one frame's linear pass sequence. Rebuilt every
/// frame; not a stable cross-frame identity like [`ResourceId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassIndex(pub u32);

/// Index of a command encoder within one frame's encoder sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncoderIndex(pub u32);

/// Index of a command buffer within one frame's command-buffer sequence.
/// Multiple encoders can share a command buffer; multiple
/// command buffers partition the frame along queue and fence boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandBufferIndex(pub u32);

/// Compiled metadata for one pass, produced by a [`crate::context::GraphCompiler`].
/// Carries no reference to the pass's own encode closure — that lives
/// alongside it in [`crate::context::CompiledGraph`] — so the scheduler
/// (which never calls into user code) can stay generic-free.
#[derive(Clone, Debug)]
pub struct RenderPassRecord {
    pub pass_index: PassIndex,
    pub pass_type: PassType,
    pub queue: QueueId,
    pub name: String,
    pub command_range: std::ops::Range<u32>,
    pub uses_window_texture: bool,
    pub render_target: Option<u64>,
    /// Set false by the generator's dead-pass elimination when nothing the
    /// pass writes is ever read.
    pub is_active: bool,
}
