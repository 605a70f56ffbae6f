//! Partitions a frame's linear pass sequence into encoders and command
//! buffers.
//!
//! Grounded on the encoder/command-buffer split `cbtasks::CmdBufferTaskBuilder`
//! makes explicit (one task pair per command buffer, each wrapping however
//! many encoders it was handed) — generalized here into the partitioning
//! rule itself, since the source crate took the partition as a given rather
//! than computing one.

use smallvec::SmallVec;

use crate::pass::{CommandBufferIndex, EncoderIndex, PassIndex, PassType, RenderPassRecord};
use crate::queue::QueueId;

/// One encoder: a maximal run of consecutive, active passes that the
/// backend can record into a single encoder object.
#[derive(Clone, Debug)]
pub struct CommandEncoderInfo {
    pub encoder_index: EncoderIndex,
    pub command_buffer_index: CommandBufferIndex,
    pub queue: QueueId,
    /// True if any pass in this encoder reads or writes a window-handle
    /// resource. A command buffer never mixes encoders with different
    /// values of this flag, since presenting the swapchain at the end of
    /// one that doesn't touch it would be meaningless.
    pub uses_window_texture: bool,
    pub pass_range: std::ops::Range<u32>,
}

/// The full encoder/command-buffer partition for one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameCommandInfo {
    pub encoders: Vec<CommandEncoderInfo>,
    pub command_buffer_count: u32,
}

impl FrameCommandInfo {
    pub fn encoder_for_pass(&self, pass: PassIndex) -> Option<&CommandEncoderInfo> {
        self.encoders
            .iter()
            .find(|e| e.pass_range.contains(&pass.0))
    }

    pub fn encoder_count(&self) -> usize {
        self.encoders.len()
    }
}

impl CommandEncoderInfo {
    /// Human-readable label for diagnostics: the constituent pass names
    /// inline when there are four or fewer, otherwise a span summary. Never
    /// consulted by the partitioner or the generator, only by `Debug`/trace
    /// output built on top of an already-computed schedule.
    pub fn summary(&self, passes: &[RenderPassRecord]) -> String {
        let names: Vec<&str> = passes[self.pass_range.start as usize..self.pass_range.end as usize]
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        match names.as_slice() {
            [] => String::new(),
            _ if names.len() <= 4 => names.join(", "),
            _ => format!("[{}…{}] ({} passes)", names[0], names[names.len() - 1], names.len()),
        }
    }
}

/// Whether `next` may share an encoder with the pass immediately before it,
/// `prev`. A draw pass may follow anything; a blit may only follow another
/// blit; every other pass type (compute, acceleration-structure, external)
/// always starts a fresh encoder, since those command types don't compose
/// into one backend encoder object the way consecutive draws or blits do.
/// Two consecutive draws additionally only coalesce when they target the
/// same render target. A pass that doesn't declare one (`None`) merges with
/// anything — declaring a render target is optional, and the absence of one
/// isn't itself a distinguishing identity.
fn passes_coalesce(prev: &RenderPassRecord, next: &RenderPassRecord) -> bool {
    let type_allows = match next.pass_type {
        PassType::Draw => true,
        PassType::Blit => prev.pass_type == PassType::Blit,
        _ => false,
    };
    if !type_allows {
        return false;
    }
    if prev.pass_type == PassType::Draw && next.pass_type == PassType::Draw {
        return match (prev.render_target, next.render_target) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
    }
    true
}

struct OpenRun {
    queue: QueueId,
    uses_window_texture: bool,
    command_buffer_index: CommandBufferIndex,
    start: u32,
}

/// Splits `passes` into encoders and command buffers. A command buffer
/// boundary is forced by a queue change or by `uses_window_texture`
/// flipping; within a command buffer, an encoder boundary is additionally
/// forced whenever [`passes_coalesce`] says the two passes can't share one.
/// CPU passes occupy no encoder — they run before the fence wait of
/// whatever GPU pass follows them and are skipped here entirely; the
/// context still executes them in pass order.
pub fn partition_frame(passes: &[RenderPassRecord]) -> FrameCommandInfo {
    let mut encoders = Vec::new();
    let mut command_buffer_count: u32 = 0;
    let mut current: Option<OpenRun> = None;

    let flush = |current: &mut Option<OpenRun>, end: u32, encoders: &mut Vec<CommandEncoderInfo>| {
        if let Some(run) = current.take() {
            if end > run.start {
                encoders.push(CommandEncoderInfo {
                    encoder_index: EncoderIndex(encoders.len() as u32),
                    command_buffer_index: run.command_buffer_index,
                    queue: run.queue,
                    uses_window_texture: run.uses_window_texture,
                    pass_range: run.start..end,
                });
            }
        }
    };

    for (i, pass) in passes.iter().enumerate() {
        let i = i as u32;
        if pass.pass_type == PassType::Cpu || !pass.is_active {
            flush(&mut current, i, &mut encoders);
            continue;
        }

        let needs_new_cb = match &current {
            Some(run) => run.queue != pass.queue || run.uses_window_texture != pass.uses_window_texture,
            None => true,
        };
        let needs_new_encoder = needs_new_cb
            || !passes_coalesce(&passes[(i - 1) as usize], pass);

        if needs_new_cb {
            flush(&mut current, i, &mut encoders);
            let cb = CommandBufferIndex(command_buffer_count);
            command_buffer_count += 1;
            current = Some(OpenRun { queue: pass.queue, uses_window_texture: pass.uses_window_texture, command_buffer_index: cb, start: i });
        } else if needs_new_encoder {
            let run = current.as_ref().unwrap();
            let (queue, uses_window_texture, cb) = (run.queue, run.uses_window_texture, run.command_buffer_index);
            flush(&mut current, i, &mut encoders);
            current = Some(OpenRun { queue, uses_window_texture, command_buffer_index: cb, start: i });
        }
    }
    flush(&mut current, passes.len() as u32, &mut encoders);

    FrameCommandInfo { encoders, command_buffer_count }
}

/// Per-queue grouping of encoder indices, used by the generator to decide
/// fence placement between consecutive command buffers on the same queue.
pub fn encoders_by_queue(info: &FrameCommandInfo) -> smallvec::SmallVec<[(QueueId, SmallVec<[EncoderIndex; 4]>); 4]> {
    let mut groups: smallvec::SmallVec<[(QueueId, SmallVec<[EncoderIndex; 4]>); 4]> = SmallVec::new();
    for encoder in &info.encoders {
        if let Some((_, list)) = groups.iter_mut().find(|(q, _)| *q == encoder.queue) {
            list.push(encoder.encoder_index);
        } else {
            let mut list = SmallVec::new();
            list.push(encoder.encoder_index);
            groups.push((encoder.queue, list));
        }
    }
    groups
}
