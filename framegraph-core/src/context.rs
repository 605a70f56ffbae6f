//! The render-graph context: the driver that turns a frame's
//! declared passes into materialized resources, ordered encoders, and
//! submitted command buffers.
//!
//! Grounded on `cbtasks::CmdBufferTaskBuilder::add_to_graph`'s encode/submit
//! wiring and `taskman::scheduler::GraphBuilder`'s bounded-in-flight
//! execution model, generalized from that crate's fixed two-task shape
//! into a loop over however many encoders [`crate::frame_info::partition_frame`]
//! produced, and driven by `tokio`'s async primitives rather than a
//! blocking task graph so a cross-queue wait doesn't park a worker thread.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use slotmap::{SecondaryMap, SlotMap};
use tokio::sync::Semaphore;

use crate::backend::{Backend, BackendResourceRef, CommandBufferRef};
use crate::dependency::WaitToken;
use crate::end_actions::CommandEndActionManager;
use crate::error::{GraphError, Result};
use crate::frame_info::partition_frame;
use crate::generator::{self, CommandOrder, PreFrameCommand};
use crate::pass::{CommandBufferIndex, DeclaredPass, EncoderIndex, PassIndex, PassInstantiationContext, RenderPass, RenderPassRecord};
use crate::queue::{QueueCommandIndices, QueueId, QueueRegistry};
use crate::resource::{ResourceData, ResourceFlags, ResourceId, ResourceShape};
use crate::usage::ResourceUsage;

/// A pass plus its factory output, bundled once the compiler has decided
/// where in the frame it sits.
pub struct CompiledGraph {
    pub pass_records: Vec<RenderPassRecord>,
    pub factories: Vec<Box<dyn FnOnce(&PassInstantiationContext) -> Box<dyn RenderPass> + Send>>,
}

/// The external "compile" collaborator: turns a batch of
/// declared passes into the metadata the generator needs, and records each
/// declared usage against its resource. Implemented once per application;
/// [`LinearCompiler`] is a minimal reference implementation good enough for
/// a single render pass per declared pass.
pub trait GraphCompiler: Send {
    fn compile(
        &mut self,
        declared: Vec<DeclaredPass>,
        resources: &mut SlotMap<ResourceId, ResourceData>,
    ) -> Result<CompiledGraph>;
}

/// Assigns each declared pass exactly one command index and records its
/// usages verbatim. Adequate for passes that issue a single logical
/// operation (a blit, a compute dispatch); a real renderer with
/// multi-command passes supplies its own [`GraphCompiler`].
#[derive(Default)]
pub struct LinearCompiler;

impl GraphCompiler for LinearCompiler {
    fn compile(
        &mut self,
        declared: Vec<DeclaredPass>,
        resources: &mut SlotMap<ResourceId, ResourceData>,
    ) -> Result<CompiledGraph> {
        let mut pass_records = Vec::with_capacity(declared.len());
        let mut factories = Vec::with_capacity(declared.len());

        for (i, pass) in declared.into_iter().enumerate() {
            let command_index = i as u32;
            let uses_window_texture = pass.resource_uses.iter().any(|u| {
                resources
                    .get(u.resource)
                    .map(|r| r.flags.contains(ResourceFlags::WINDOW_HANDLE))
                    .unwrap_or(false)
            });

            for declared_usage in &pass.resource_uses {
                if let Some(data) = resources.get_mut(declared_usage.resource) {
                    data.usages.push(ResourceUsage {
                        resource: declared_usage.resource,
                        pass: PassIndex(command_index),
                        usage_type: declared_usage.usage_type,
                        stages: declared_usage.stages,
                        command_range: command_index..(command_index + 1),
                        active_range: declared_usage.active_range.clone(),
                    });
                }
            }

            pass_records.push(RenderPassRecord {
                pass_index: PassIndex(command_index),
                pass_type: pass.pass_type,
                queue: pass.queue,
                name: pass.name,
                command_range: command_index..(command_index + 1),
                uses_window_texture,
                render_target: pass.render_target,
                is_active: true,
            });
            factories.push(pass.factory);
        }

        Ok(CompiledGraph { pass_records, factories })
    }
}

/// Per-frame bookkeeping the context needs to register a window texture
/// into; only exists while at least one frame is in flight. A caller that
/// calls `registerWindowTexture` outside a frame gets a reported-then-
/// ignored error instead of a registry to write into.
struct TransientRegistry {
    window_handles: parking_lot::Mutex<Vec<ResourceId>>,
}

/// Drives the execution of one frame's declared passes end to end:
/// compile, hazard-analyze, partition into encoders, materialize
/// resources, encode, submit, and dispose.
pub struct Context {
    backend: Arc<dyn Backend>,
    resources: SlotMap<ResourceId, ResourceData>,
    resource_handles: SecondaryMap<ResourceId, BackendResourceRef>,
    queue_registry: Arc<QueueRegistry>,
    end_actions: Arc<CommandEndActionManager>,
    in_flight: Arc<Semaphore>,
    next_command_buffer_index: AtomicU64,
    transient_registry: Option<TransientRegistry>,
}

impl Context {
    /// `max_frames_in_flight` of zero disables [`Context::register_window_texture`]
    /// entirely: a context with no in-flight capacity has nowhere to stash
    /// a per-frame registration.
    pub fn new(backend: Arc<dyn Backend>, max_frames_in_flight: usize) -> Self {
        Context {
            backend,
            resources: SlotMap::with_key(),
            resource_handles: SecondaryMap::new(),
            queue_registry: Arc::new(QueueRegistry::new()),
            end_actions: Arc::new(CommandEndActionManager::new()),
            in_flight: Arc::new(Semaphore::new(max_frames_in_flight.max(1))),
            // Starts at 1, not 0: `CommandEndActionManager` initializes
            // `last_completed` to 0 to mean "nothing has completed yet",
            // so index 0 would be indistinguishable from that sentinel and
            // its completion notification would be silently swallowed.
            next_command_buffer_index: AtomicU64::new(1),
            transient_registry: if max_frames_in_flight == 0 {
                None
            } else {
                Some(TransientRegistry { window_handles: parking_lot::Mutex::new(Vec::new()) })
            },
        }
    }

    pub fn declare_resource(&mut self, kind: crate::resource::ResourceKind, flags: ResourceFlags, shape: ResourceShape) -> ResourceId {
        self.resources.insert(ResourceData::new(kind, flags, shape))
    }

    pub fn register_window_texture(&self, resource: ResourceId) -> Result<()> {
        match &self.transient_registry {
            Some(registry) => {
                registry.window_handles.lock().push(resource);
                Ok(())
            }
            None => {
                warn!("registerWindowTexture called on a context with zero in-flight frames; ignoring");
                Err(GraphError::NoTransientRegistry)
            }
        }
    }

    pub fn end_actions(&self) -> &Arc<CommandEndActionManager> {
        &self.end_actions
    }

    /// Count of resources with a live backend handle, for diagnostics
    /// overlays — not consulted by any scheduling decision.
    pub fn materialized_resource_count(&self) -> usize {
        self.resource_handles.len()
    }

    /// Runs one frame: compiles `declared` via `compiler`, computes the
    /// hazard-safe command streams, and submits the resulting command
    /// buffers.
    ///
    /// `waiting_for`, if given, is a set of other queues' submission points
    /// this frame's work must not begin before (a cross-context barrier
    /// supplied by the caller, not derived from this frame's own hazards).
    /// `on_swapchain_presented` runs once this frame's swapchain present
    /// has been scheduled, if any encoder touched a window texture.
    /// `on_completion` runs once every command buffer this frame submitted
    /// has been observed complete, with the half-open range of this
    /// context's global command-buffer indices the frame occupied — empty
    /// if the frame submitted no command buffers at all.
    ///
    /// Returns a [`WaitToken`] for the last command buffer committed this
    /// frame (a zero-valued token on queue 0 if the frame submitted none),
    /// so a caller can wait on this frame's work without registering an
    /// end-action.
    pub async fn execute_render_graph(
        &mut self,
        declared: Vec<DeclaredPass>,
        compiler: &mut dyn GraphCompiler,
        waiting_for: Option<&QueueCommandIndices>,
        mut on_swapchain_presented: Option<Box<dyn FnOnce() + Send>>,
        on_completion: Option<Box<dyn FnOnce(Range<u64>) + Send>>,
    ) -> Result<WaitToken> {
        let _permit = self.in_flight.clone().acquire_owned().await.map_err(|_| GraphError::Cancelled)?;

        let frame_start_cb = self.next_command_buffer_index.load(Ordering::Acquire);

        if let Some(indices) = waiting_for {
            self.wait_for_indices(indices).await;
        }

        for data in self.resources.values_mut() {
            data.begin_frame();
        }

        let mut compiled = compiler.compile(declared, &mut self.resources)?;
        generator::mark_dead_passes(&mut compiled.pass_records, &self.resources);
        let frame_info = partition_frame(&compiled.pass_records);

        let mut pass_objects: Vec<Option<Box<dyn RenderPass>>> = Vec::with_capacity(compiled.pass_records.len());
        for (record, factory) in compiled.pass_records.iter().zip(compiled.factories) {
            if !record.is_active {
                pass_objects.push(None);
                continue;
            }
            let encoder_index = frame_info
                .encoder_for_pass(record.pass_index)
                .map(|e| e.encoder_index)
                .unwrap_or(EncoderIndex(0));
            let instantiation_ctx = PassInstantiationContext { pass_index: record.pass_index, encoder_index };
            pass_objects.push(Some(factory(&instantiation_ctx)));
        }

        let generated = generator::generate(&compiled.pass_records, &self.resources, &frame_info);

        let owning_encoder = |command_index: u32| frame_info.encoder_for_pass(PassIndex(command_index)).map(|e| e.encoder_index);

        // Commands tied to a pass index that landed in no encoder at all
        // (e.g. every pass touching that resource was eliminated as dead)
        // have nowhere left to be interleaved; run them up front so a
        // materialize/dispose pair is never silently dropped.
        for (_, command) in generated.pre_frame.iter().filter(|(key, _)| owning_encoder(key.command_index()).is_none()) {
            self.execute_pre_frame_command(command).await?;
        }

        // Populated as each command buffer commits, so a later encoder's
        // cross-queue wait can be resolved to the submission index that was
        // actually assigned rather than a value computed ahead of time.
        let mut committed: std::collections::HashMap<CommandBufferIndex, (QueueId, u64)> = std::collections::HashMap::new();
        let mut last_committed: Option<WaitToken> = None;

        let mut current_buffer: Option<(u32, bool, CommandBufferRef)> = None;
        for encoder in &frame_info.encoders {
            if current_buffer.as_ref().map(|(idx, _, _)| *idx) != Some(encoder.command_buffer_index.0) {
                if let Some((idx, uses_window_texture, buffer)) = current_buffer.take() {
                    let (queue, submission_index) =
                        self.commit(buffer, uses_window_texture, &mut on_swapchain_presented)?;
                    committed.insert(CommandBufferIndex(idx), (queue, submission_index));
                    last_committed = Some(WaitToken { queue, execution_index: submission_index });
                }
                let queue = self.backend.queue(encoder.queue);
                current_buffer = Some((encoder.command_buffer_index.0, encoder.uses_window_texture, queue.make_command_buffer()?));
            }

            for (_, command) in generated
                .pre_frame
                .iter()
                .filter(|(key, _)| key.order() == CommandOrder::Before && owning_encoder(key.command_index()) == Some(encoder.encoder_index))
            {
                self.execute_pre_frame_command(command).await?;
            }

            let buffer = &mut current_buffer.as_mut().unwrap().2;

            for pending in generated
                .pending_cross_queue_waits
                .iter()
                .filter(|p| p.consumer_encoder == encoder.encoder_index)
            {
                // The producer's command buffer was necessarily committed
                // already: encoders are visited in index order and a
                // hazard's producer always precedes its consumer.
                if let Some(&(queue, submission_index)) = committed.get(&pending.producer_command_buffer) {
                    self.apply_cross_queue_wait(buffer, &WaitToken { queue, execution_index: submission_index }).await?;
                }
            }
            for (_, wait) in generated.prior_frame_waits.iter().filter(|(e, _)| *e == encoder.encoder_index) {
                self.apply_cross_queue_wait(buffer, wait).await?;
            }

            buffer.begin_encoder(encoder.encoder_index.0)?;

            let mut commands = generated.per_encoder[encoder.encoder_index.0 as usize].clone();
            generator::sorted_commands(&mut commands);
            for (_, command) in &commands {
                debug!("encoder {:?}: {:?}", encoder.encoder_index, command);
            }

            for pass_index in encoder.pass_range.clone() {
                if let Some(mut pass) = pass_objects.get_mut(pass_index as usize).and_then(Option::take) {
                    pass.encode(buffer.as_mut())?;
                }
            }

            buffer.end_encoder()?;

            for (_, command) in generated
                .pre_frame
                .iter()
                .filter(|(key, _)| key.order() == CommandOrder::After && owning_encoder(key.command_index()) == Some(encoder.encoder_index))
            {
                self.execute_pre_frame_command(command).await?;
            }
        }

        if let Some((idx, uses_window_texture, buffer)) = current_buffer.take() {
            let (queue, submission_index) = self.commit(buffer, uses_window_texture, &mut on_swapchain_presented)?;
            committed.insert(CommandBufferIndex(idx), (queue, submission_index));
            last_committed = Some(WaitToken { queue, execution_index: submission_index });
        }

        // Every write this frame is now backed by a real submission index;
        // persist it onto the resource so the *next* frame's reuse of it
        // (if any) knows exactly which queue and index to wait on, instead
        // of guessing from whatever queue happens to read it first.
        for (resource, cb) in &generated.pending_write_wait_updates {
            if let Some(&(queue, submission_index)) = committed.get(cb) {
                if let Some(data) = self.resources.get_mut(*resource) {
                    data.write_wait_index = Some(WaitToken { queue, execution_index: submission_index });
                }
            }
        }
        for (resource, queue, cb) in &generated.pending_read_wait_updates {
            if let Some(&(_, submission_index)) = committed.get(cb) {
                if let Some(data) = self.resources.get_mut(*resource) {
                    data.read_wait_indices.set(*queue, submission_index);
                }
            }
        }

        let frame_end_cb = self.next_command_buffer_index.load(Ordering::Acquire);
        if let Some(on_completion) = on_completion {
            if frame_end_cb > frame_start_cb {
                self.end_actions.register(frame_end_cb - 1, Box::new(move || on_completion(frame_start_cb..frame_end_cb)));
            } else {
                on_completion(frame_start_cb..frame_start_cb);
            }
        }

        Ok(last_committed.unwrap_or(WaitToken { queue: QueueId(0), execution_index: 0 }))
    }

    fn materialise(&mut self, resource: ResourceId) -> Result<()> {
        let shape = self.resources.get(resource).map(|d| d.shape).unwrap_or(ResourceShape::Opaque);
        let is_window = self
            .resources
            .get(resource)
            .map(|d| d.flags.contains(ResourceFlags::WINDOW_HANDLE))
            .unwrap_or(false);
        let handle = if is_window {
            self.backend.allocator().allocate_window_handle_texture(resource)?
        } else {
            self.backend.allocator().allocate(resource, shape)?
        };
        self.resource_handles.insert(resource, handle);
        if let Some(data) = self.resources.get_mut(resource) {
            data.state.insert(crate::resource::ResourceStateFlags::INITIALISED);
        }
        Ok(())
    }

    /// Dispatches one resource-lifetime command to the backend. Async only
    /// because [`PreFrameCommand::WaitForQueueCommand`] may need to poll a
    /// cross-queue completion; every other variant resolves synchronously.
    async fn execute_pre_frame_command(&mut self, command: &PreFrameCommand) -> Result<()> {
        match command {
            PreFrameCommand::MaterialiseBuffer(r)
            | PreFrameCommand::MaterialiseTexture(r)
            | PreFrameCommand::MaterialiseTextureView(r)
            | PreFrameCommand::MaterialiseArgumentBuffer(r)
            | PreFrameCommand::MaterialiseArgumentBufferArray(r)
            | PreFrameCommand::MaterialiseVisibleFunctionTable(r)
            | PreFrameCommand::MaterialiseIntersectionFunctionTable(r) => self.materialise(*r),
            PreFrameCommand::WaitForQueueCommand(wait) => {
                self.wait_for_queue(wait).await;
                Ok(())
            }
            PreFrameCommand::WaitForHeapAliasingFences(resource) => self.backend.allocator().wait_for_heap_aliasing_fences(*resource),
            PreFrameCommand::DisposeResource(resource) => {
                if let Some(handle) = self.resource_handles.remove(*resource) {
                    self.backend.allocator().dispose(*resource, handle, None);
                }
                Ok(())
            }
            PreFrameCommand::SetDisposalFences { resource, fences } => {
                self.backend.allocator().set_disposal_fences(*resource, fences);
                Ok(())
            }
        }
    }

    /// Assigns this command buffer both a per-frame global index (for
    /// `CommandEndActionManager`'s device-wide FIFO ordering) and a
    /// per-queue submission index (for `QueueRegistry`, which is what
    /// cross-queue `WaitToken`s are resolved against) *before* committing,
    /// since the completion handler must be registered before `commit`
    /// consumes the buffer and has no later opportunity to learn either
    /// index from the backend. Returns the queue and submission index so a
    /// later encoder's pending cross-queue wait can be resolved against it.
    fn commit(
        &self,
        mut buffer: CommandBufferRef,
        uses_window_texture: bool,
        on_swapchain_presented: &mut Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(QueueId, u64)> {
        let queue = buffer.queue();
        let cb_index = self.next_command_buffer_index.fetch_add(1, Ordering::AcqRel);
        let submission_index = self.queue_registry.next_submission_index(queue);

        if uses_window_texture {
            buffer.present_swapchains()?;
            if let Some(callback) = on_swapchain_presented.take() {
                callback();
            }
        }
        if let Some(event) = self.backend.sync_event(queue) {
            buffer.signal_event(&event, submission_index)?;
        }

        let queue_registry = self.queue_registry.clone();
        let end_actions = self.end_actions.clone();
        buffer.add_completion_handler(Box::new(move |_err: Option<&str>| {
            queue_registry.mark_completed(queue, submission_index);
            end_actions.notify_completed(cb_index);
        }));
        buffer.commit()?;
        Ok((queue, submission_index))
    }

    /// Waits for a cross-queue hazard to clear, preferring a GPU-side
    /// timeline-event wait encoded directly onto `buffer` when the backend
    /// exposes one for the producer's queue, and falling back to a CPU
    /// poll of [`QueueRegistry`] otherwise (e.g. the producer is a queue
    /// foreign to this backend).
    async fn apply_cross_queue_wait(&self, buffer: &mut CommandBufferRef, wait: &WaitToken) -> Result<()> {
        if let Some(event) = self.backend.sync_event(wait.queue) {
            buffer.wait_for_event(&event, wait.execution_index)
        } else {
            self.wait_for_queue(wait).await;
            Ok(())
        }
    }

    async fn wait_for_queue(&self, wait: &WaitToken) {
        let mut indices = QueueCommandIndices::zero();
        indices.set(wait.queue, wait.execution_index);
        self.wait_for_indices(&indices).await;
    }

    async fn wait_for_indices(&self, indices: &QueueCommandIndices) {
        while !self.queue_registry.is_complete(indices) {
            tokio::task::yield_now().await;
        }
    }
}
