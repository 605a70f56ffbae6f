//! Usage taxonomy: how a pass touches a resource, and at which pipeline
//! stages.

use bitflags::bitflags;

use crate::pass::PassIndex;
use crate::range::ActiveRange;
use crate::resource::ResourceId;

bitflags! {
    /// Pipeline stages that may read or write a resource. Used both to pick
    /// the correct stage mask for a barrier and, via `CPU_BEFORE_RENDER`, to
    /// represent the synthetic usage a persistent resource gets at frame
    /// start so its previous frame's last writer can be waited on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StageFlags: u16 {
        const VERTEX             = 1 << 0;
        const FRAGMENT           = 1 << 1;
        const COMPUTE            = 1 << 2;
        const BLIT               = 1 << 3;
        const INDIRECT           = 1 << 4;
        const ACCELERATION_BUILD = 1 << 5;
        const CPU_BEFORE_RENDER  = 1 << 6;
    }
}

/// How a pass uses a resource at one point in the command stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageType {
    /// An argument buffer slot that was bound but never actually read by
    /// the shader that ran; tracked so the generator can skip emitting a
    /// barrier no shader observes.
    UnusedArgumentBuffer,
    Read,
    Write,
    ReadWrite,
    RenderTargetColor,
    RenderTargetDepth,
    RenderTargetStencil,
    /// A render target also sampled from within the same subpass.
    InputAttachment,
    ReadWriteRenderTarget,
    /// Synthetic usage inserted at the top of a persistent resource's first
    /// pass in a frame, so `indexOfPreviousWrite` has something to find
    /// even though the writer ran in a prior frame.
    FrameStartLayoutTransitionCheck,
}

impl UsageType {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            UsageType::Write
                | UsageType::ReadWrite
                | UsageType::RenderTargetColor
                | UsageType::RenderTargetDepth
                | UsageType::RenderTargetStencil
                | UsageType::ReadWriteRenderTarget
        )
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            UsageType::Read
                | UsageType::ReadWrite
                | UsageType::InputAttachment
                | UsageType::ReadWriteRenderTarget
                | UsageType::FrameStartLayoutTransitionCheck
        )
    }

    pub fn is_render_target(&self) -> bool {
        matches!(
            self,
            UsageType::RenderTargetColor
                | UsageType::RenderTargetDepth
                | UsageType::RenderTargetStencil
                | UsageType::InputAttachment
                | UsageType::ReadWriteRenderTarget
        )
    }
}

/// One recorded touch of a resource by a pass, at a known position in the
/// command stream.
#[derive(Clone, Debug)]
pub struct ResourceUsage {
    pub resource: ResourceId,
    pub pass: PassIndex,
    pub usage_type: UsageType,
    pub stages: StageFlags,
    /// Command indices (within the pass's encoder) this usage spans.
    pub command_range: std::ops::Range<u32>,
    pub active_range: ActiveRange,
}
