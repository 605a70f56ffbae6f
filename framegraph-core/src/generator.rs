//! The resource command generator — the heart of the
//! scheduler. Walks every resource's recorded usages in pass order and
//! emits the materialization, residency, barrier, disposal and
//! cross-encoder wait commands that make the hazards those usages imply
//! safe to execute out of program order.
//!
//! Grounded on `passman::scheduler::ScheduleBuilder`'s resource-lifetime
//! and barrier-minimization pass: that code computes, for each resource,
//! the chronologically-ordered set of passes that touch it and derives
//! wait/signal points from adjacent producer/consumer pairs. This module
//! generalizes that to subresource-range hazards (RAW/WAW/WAR, not just
//! "has this resource been produced yet") and to the full materialize/
//! residency/barrier/fence/disposal/wait-token command set needed for a
//! multi-queue backend.

use std::collections::HashMap;

use slotmap::SlotMap;
use smallvec::{smallvec, SmallVec};

use crate::dependency::{DependencyTable, WaitToken};
use crate::frame_info::FrameCommandInfo;
use crate::pass::{CommandBufferIndex, EncoderIndex, PassIndex, RenderPassRecord};
use crate::queue::{QueueId, MAX_QUEUES};
use crate::range::ActiveRange;
use crate::resource::{ResourceData, ResourceFlags, ResourceId, ResourceKind, ResourceShape};
use crate::usage::{StageFlags, UsageType};

/// Where in the fixed per-command ordering a generated command sits,
/// relative to the pass command it's associated with. Two commands that
/// land on the same `command_index` are ordered `Before` < `After`, and
/// ties within the same order are broken by `tag` (lower materializes /
/// waits first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOrder {
    Before,
    After,
}

impl SortKey {
    pub fn new(command_index: u32, order: CommandOrder, tag: u8) -> Self {
        let order_bit = match order {
            CommandOrder::Before => 0u64,
            CommandOrder::After => 1u64,
        };
        SortKey(((command_index as u64) << 3) | (order_bit << 2) | (tag as u64 & 0x3))
    }

    pub fn command_index(&self) -> u32 {
        (self.0 >> 3) as u32
    }

    pub fn order(&self) -> CommandOrder {
        if (self.0 >> 2) & 1 == 1 {
            CommandOrder::After
        } else {
            CommandOrder::Before
        }
    }
}

/// Commands tied to a resource's lifetime rather than to any one encoder's
/// recorded commands: materialization and cross-frame waits before its
/// first use, heap-aliasing fences around disposal, and disposal itself
/// after its last use. Each is stamped with a [`SortKey`] keyed to the
/// command index of the usage it belongs to, so the context can interleave
/// them with the right encoder rather than running the whole batch
/// upfront.
#[derive(Clone, Debug)]
pub enum PreFrameCommand {
    MaterialiseBuffer(ResourceId),
    MaterialiseTexture(ResourceId),
    MaterialiseTextureView(ResourceId),
    MaterialiseArgumentBuffer(ResourceId),
    MaterialiseArgumentBufferArray(ResourceId),
    MaterialiseVisibleFunctionTable(ResourceId),
    MaterialiseIntersectionFunctionTable(ResourceId),
    /// A persistent resource's last writer (from a previous frame, on a
    /// possibly different queue) hasn't yet been observed complete.
    WaitForQueueCommand(WaitToken),
    /// `resource`'s backing heap range aliases another resource's; block
    /// materialization until every fence set by that resource's disposal
    /// has retired.
    WaitForHeapAliasingFences(ResourceId),
    /// `resource` was used for the last time this frame and is transient:
    /// its backend handle is released back to the allocator.
    DisposeResource(ResourceId),
    /// Records the command buffers that must retire before `resource`'s
    /// heap range (an [`ResourceFlags::ALIASED_HEAP`] resource) may be
    /// reused by whatever aliases it next.
    SetDisposalFences {
        resource: ResourceId,
        fences: SmallVec<[CommandBufferIndex; 2]>,
    },
}

/// Commands interleaved with a pass's own commands inside one encoder.
#[derive(Clone, Debug)]
pub enum FrameResourceCommand {
    UseResource {
        resource: ResourceId,
        usage: UsageType,
        stages: StageFlags,
        /// True if this declaration may be hoisted to the top of the
        /// encoder (the common case: it only pins residency, it doesn't
        /// fix a relative order). Render-target usages are pinned to their
        /// last occurrence instead and must not be reordered past it.
        allow_reordering: bool,
    },
    MemoryBarrier {
        resource: ResourceId,
        after_stages: StageFlags,
        before_stages: StageFlags,
        /// The overlap between producer and consumer subresource ranges —
        /// the precise region the barrier needs to cover, rather than the
        /// whole resource.
        active_range: ActiveRange,
    },
}

/// A cross-queue hazard between two usages in the *same* frame: the
/// producer's submission index isn't known yet at generate time (its
/// command buffer hasn't been committed), so this names the producer's
/// command buffer instead of a concrete [`WaitToken`]. Resolved to one by
/// the context once that command buffer is actually committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingCrossQueueWait {
    pub consumer_encoder: EncoderIndex,
    pub producer_queue: QueueId,
    pub producer_command_buffer: CommandBufferIndex,
}

pub struct GeneratedCommands {
    pub pre_frame: Vec<(SortKey, PreFrameCommand)>,
    /// Indexed by `EncoderIndex`.
    pub per_encoder: Vec<Vec<(SortKey, FrameResourceCommand)>>,
    pub dependency_table: DependencyTable,
    /// Already-resolved waits on a *previous* frame's submission — emitted
    /// when a persistent resource's first use this frame must wait for
    /// last frame's final writer (or, for a write, every queue that read
    /// it last frame).
    pub prior_frame_waits: Vec<(EncoderIndex, WaitToken)>,
    /// Cross-queue hazards between usages in this same frame, not yet
    /// resolved to a submission index.
    pub pending_cross_queue_waits: Vec<PendingCrossQueueWait>,
    /// For each resource written this frame, the command buffer of its
    /// *last* write — once that buffer commits, the context stores the
    /// resulting [`WaitToken`] onto [`ResourceData::write_wait_index`] so
    /// the next frame's reuse of this resource knows exactly what to wait
    /// on.
    pub pending_write_wait_updates: Vec<(ResourceId, CommandBufferIndex)>,
    /// For each resource read this frame, the command buffer of its last
    /// read on each queue that read it — resolved the same way, onto
    /// [`ResourceData::read_wait_indices`].
    pub pending_read_wait_updates: Vec<(ResourceId, QueueId, CommandBufferIndex)>,
}

fn materialise_command(kind: ResourceKind, resource: ResourceId) -> PreFrameCommand {
    match kind {
        ResourceKind::Buffer => PreFrameCommand::MaterialiseBuffer(resource),
        ResourceKind::Texture => PreFrameCommand::MaterialiseTexture(resource),
        ResourceKind::TextureView => PreFrameCommand::MaterialiseTextureView(resource),
        ResourceKind::ArgumentBuffer => PreFrameCommand::MaterialiseArgumentBuffer(resource),
        ResourceKind::ArgumentBufferArray => PreFrameCommand::MaterialiseArgumentBufferArray(resource),
        ResourceKind::VisibleFunctionTable => PreFrameCommand::MaterialiseVisibleFunctionTable(resource),
        ResourceKind::IntersectionFunctionTable => PreFrameCommand::MaterialiseIntersectionFunctionTable(resource),
    }
}

/// Backward liveness pass: a write usage is live if it is ever read by a
/// later, live usage, or if the resource is persistent/window-backed (its
/// contents are observed outside this frame's usage list). A pass becomes
/// dead once every usage it contributes is a dead write and it has no live
/// reads of its own.
pub fn mark_dead_passes(passes: &mut [RenderPassRecord], resources: &SlotMap<ResourceId, ResourceData>) {
    let mut pass_is_live = vec![false; passes.len()];

    for data in resources.values() {
        let externally_observed = data.flags.intersects(
            ResourceFlags::PERSISTENT | ResourceFlags::WINDOW_HANDLE | ResourceFlags::HISTORY_BUFFER,
        );
        let mut live_from_end = externally_observed;
        for usage in data.usages.iter().rev() {
            if usage.usage_type.is_read() {
                live_from_end = true;
            }
            if live_from_end {
                if let Some(slot) = pass_is_live.get_mut(usage.pass.0 as usize) {
                    *slot = true;
                }
            }
        }
    }

    for (pass, live) in passes.iter_mut().zip(pass_is_live) {
        // External and CPU passes are never eliminated: they may have
        // effects (presentation, host writes) this algorithm can't see.
        if !live && pass.pass_type != crate::pass::PassType::External && pass.pass_type != crate::pass::PassType::Cpu {
            pass.is_active = false;
        }
    }
}

/// Generates the full pre-frame and per-encoder command streams for one
/// frame, given every resource's recorded usage history for that frame.
pub fn generate(
    passes: &[RenderPassRecord],
    resources: &SlotMap<ResourceId, ResourceData>,
    frame_info: &FrameCommandInfo,
) -> GeneratedCommands {
    let mut pre_frame = Vec::new();
    let mut per_encoder: Vec<Vec<(SortKey, FrameResourceCommand)>> =
        vec![Vec::new(); frame_info.encoders.len()];
    let mut dependency_table = DependencyTable::new();
    let mut prior_frame_waits = Vec::new();
    let mut pending_cross_queue_waits = Vec::new();
    let mut pending_write_wait_updates = Vec::new();
    let mut pending_read_wait_updates = Vec::new();

    let encoder_of = |pass: PassIndex| -> Option<EncoderIndex> {
        frame_info.encoder_for_pass(pass).map(|e| e.encoder_index)
    };
    let queue_of = |encoder: EncoderIndex| -> QueueId {
        frame_info.encoders[encoder.0 as usize].queue
    };
    let cb_of = |encoder: EncoderIndex| -> CommandBufferIndex {
        frame_info.encoders[encoder.0 as usize].command_buffer_index
    };

    for (resource, data) in resources.iter() {
        if data.usages.is_empty() {
            continue;
        }

        let first = &data.usages[0];
        let needs_fresh_write = !data.state.contains(crate::resource::ResourceStateFlags::INITIALISED)
            || !data.flags.contains(ResourceFlags::PERSISTENT);
        if needs_fresh_write {
            let first_command = first.command_range.start;
            if data.flags.contains(ResourceFlags::ALIASED_HEAP) {
                pre_frame.push((
                    SortKey::new(first_command, CommandOrder::Before, 0),
                    PreFrameCommand::WaitForHeapAliasingFences(resource),
                ));
            }
            pre_frame.push((
                SortKey::new(first_command, CommandOrder::Before, 1),
                materialise_command(data.kind, resource),
            ));
        } else if let Some(encoder) = encoder_of(first.pass) {
            // Persistent resource reused from a previous frame: the first
            // use this frame must wait for that frame's writer(s) it could
            // conflict with — a read only needs the last writer (RAW), but
            // a write must also wait on every queue that last read it
            // (WAR), since those reads may be on queues other than the
            // writer's.
            if let Some(wait) = data.write_wait_index {
                prior_frame_waits.push((encoder, wait));
            }
            if first.usage_type.is_write() {
                for q in 0..MAX_QUEUES {
                    let queue = QueueId(q as u8);
                    let index = data.read_wait_indices.get(queue);
                    if index > 0 {
                        prior_frame_waits.push((encoder, WaitToken { queue, execution_index: index }));
                    }
                }
            }
        }

        for (i, usage) in data.usages.iter().enumerate() {
            let Some(consumer_encoder) = encoder_of(usage.pass) else { continue };

            if usage.usage_type.is_read() {
                if let Some(w) = data.index_of_previous_write(i, &usage.active_range) {
                    emit_edge(
                        &data.usages[w],
                        usage,
                        encoder_of(data.usages[w].pass),
                        consumer_encoder,
                        resource,
                        &data.shape,
                        &mut dependency_table,
                        &mut per_encoder,
                        &mut pending_cross_queue_waits,
                        &queue_of,
                        &cb_of,
                    );
                }
            }
            if usage.usage_type.is_write() {
                if let Some(w) = data.index_of_previous_write(i, &usage.active_range) {
                    emit_edge(
                        &data.usages[w],
                        usage,
                        encoder_of(data.usages[w].pass),
                        consumer_encoder,
                        resource,
                        &data.shape,
                        &mut dependency_table,
                        &mut per_encoder,
                        &mut pending_cross_queue_waits,
                        &queue_of,
                        &cb_of,
                    );
                }
                for r in data.indices_of_previous_reads(i, &usage.active_range) {
                    emit_edge(
                        &data.usages[r],
                        usage,
                        encoder_of(data.usages[r].pass),
                        consumer_encoder,
                        resource,
                        &data.shape,
                        &mut dependency_table,
                        &mut per_encoder,
                        &mut pending_cross_queue_waits,
                        &queue_of,
                        &cb_of,
                    );
                }
            }

            // Input-attachment reads span a run of consecutive draw
            // commands within the same subpass; each transition from one
            // command to the next needs its own self-barrier, since the
            // attachment was just written by the previous command.
            if usage.usage_type == UsageType::InputAttachment && usage.command_range.len() > 1 {
                for command in (usage.command_range.start + 1)..usage.command_range.end {
                    per_encoder[consumer_encoder.0 as usize].push((
                        SortKey::new(command, CommandOrder::Before, 0),
                        FrameResourceCommand::MemoryBarrier {
                            resource,
                            after_stages: usage.stages,
                            before_stages: usage.stages,
                            active_range: usage.active_range.clone(),
                        },
                    ));
                }
            }
        }

        emit_residency_commands(resource, data, &encoder_of, &mut per_encoder);

        if let Some((_, last_write_encoder)) = data
            .usages
            .iter()
            .enumerate()
            .rev()
            .find(|(_, u)| u.usage_type.is_write())
            .and_then(|(i, u)| encoder_of(u.pass).map(|e| (i, e)))
        {
            pending_write_wait_updates.push((resource, cb_of(last_write_encoder)));
        }

        let mut last_read_cb_by_queue: HashMap<QueueId, CommandBufferIndex> = HashMap::new();
        for usage in data.usages.iter().filter(|u| u.usage_type.is_read()) {
            if let Some(encoder) = encoder_of(usage.pass) {
                last_read_cb_by_queue.insert(queue_of(encoder), cb_of(encoder));
            }
        }
        for (queue, cb) in last_read_cb_by_queue {
            pending_read_wait_updates.push((resource, queue, cb));
        }

        // Disposal: a transient resource (not persistent, not a window
        // handle — those have their own lifecycle) is released right after
        // its last usage's encoder finishes recording.
        let is_transient = !data.flags.intersects(ResourceFlags::PERSISTENT | ResourceFlags::WINDOW_HANDLE);
        if is_transient {
            if let Some((usage, encoder)) = data
                .usages
                .iter()
                .rev()
                .find_map(|u| encoder_of(u.pass).map(|e| (u, e)))
            {
                let last_command = usage.command_range.end.saturating_sub(1);
                pre_frame.push((
                    SortKey::new(last_command, CommandOrder::After, 2),
                    PreFrameCommand::DisposeResource(resource),
                ));
                if data.flags.contains(ResourceFlags::ALIASED_HEAP) {
                    pre_frame.push((
                        SortKey::new(last_command, CommandOrder::After, 3),
                        PreFrameCommand::SetDisposalFences { resource, fences: smallvec![cb_of(encoder)] },
                    ));
                }
            }
        }
    }

    pre_frame.sort_by_key(|(key, _)| *key);

    GeneratedCommands {
        pre_frame,
        per_encoder,
        dependency_table,
        prior_frame_waits,
        pending_cross_queue_waits,
        pending_write_wait_updates,
        pending_read_wait_updates,
    }
}

/// Coalesces contiguous, same-encoder usages that share a usage type and an
/// identical active range into one `UseResource` declaration instead of one
/// per pass — residency only needs to be declared once for a run of
/// compatible touches. Render-target usages are pinned to the *last*
/// occurrence in their run (a render pass must keep observing the
/// attachment as bound for its whole duration) and marked non-reorderable;
/// every other usage is pinned to the first occurrence and may be hoisted.
fn emit_residency_commands(
    resource: ResourceId,
    data: &ResourceData,
    encoder_of: &impl Fn(PassIndex) -> Option<EncoderIndex>,
    per_encoder: &mut [Vec<(SortKey, FrameResourceCommand)>],
) {
    let mut i = 0;
    while i < data.usages.len() {
        let Some(encoder) = encoder_of(data.usages[i].pass) else {
            i += 1;
            continue;
        };
        let mut j = i + 1;
        while j < data.usages.len() {
            let same_encoder = encoder_of(data.usages[j].pass) == Some(encoder);
            let compatible = same_encoder
                && data.usages[j].usage_type == data.usages[i].usage_type
                && data.usages[j].active_range.is_equal(&data.usages[i].active_range, &data.shape);
            if !compatible {
                break;
            }
            j += 1;
        }

        let group = &data.usages[i..j];
        let stages = group.iter().fold(StageFlags::empty(), |acc, u| acc | u.stages);
        let (command_index, allow_reordering) = if group[0].usage_type.is_render_target() {
            (group.last().unwrap().command_range.start, false)
        } else {
            (group[0].command_range.start, true)
        };
        per_encoder[encoder.0 as usize].push((
            SortKey::new(command_index, CommandOrder::Before, 2),
            FrameResourceCommand::UseResource { resource, usage: group[0].usage_type, stages, allow_reordering },
        ));

        i = j;
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_edge(
    producer_usage: &crate::usage::ResourceUsage,
    consumer_usage: &crate::usage::ResourceUsage,
    producer_encoder: Option<EncoderIndex>,
    consumer_encoder: EncoderIndex,
    resource: ResourceId,
    shape: &ResourceShape,
    dependency_table: &mut DependencyTable,
    per_encoder: &mut [Vec<(SortKey, FrameResourceCommand)>],
    pending_cross_queue_waits: &mut Vec<PendingCrossQueueWait>,
    queue_of: &impl Fn(EncoderIndex) -> QueueId,
    cb_of: &impl Fn(EncoderIndex) -> CommandBufferIndex,
) {
    let Some(producer_encoder) = producer_encoder else { return };

    if producer_encoder == consumer_encoder {
        let command = consumer_usage.command_range.start;
        let active_range = producer_usage.active_range.intersection(&consumer_usage.active_range, shape);
        per_encoder[consumer_encoder.0 as usize].push((
            SortKey::new(command, CommandOrder::Before, 0),
            FrameResourceCommand::MemoryBarrier {
                resource,
                after_stages: producer_usage.stages,
                before_stages: consumer_usage.stages,
                active_range,
            },
        ));
        return;
    }

    dependency_table.add_dependency(producer_encoder, consumer_encoder);

    if queue_of(producer_encoder) != queue_of(consumer_encoder) {
        pending_cross_queue_waits.push(PendingCrossQueueWait {
            consumer_encoder,
            producer_queue: queue_of(producer_encoder),
            producer_command_buffer: cb_of(producer_encoder),
        });
    }
}

/// Flattens a per-encoder command list in sort-key order, for backends
/// that want a single interleaved stream rather than walking the
/// `(SortKey, Command)` pairs themselves.
pub fn sorted_commands(commands: &mut [(SortKey, FrameResourceCommand)]) {
    commands.sort_by_key(|(key, _)| *key);
}
