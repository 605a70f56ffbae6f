//! End-to-end scenarios driving a full [`Context`] against the in-memory
//! mock backend: materialization, hazard tracking, encoder partitioning,
//! and command-buffer submission all exercised together rather than one
//! module at a time.

mod common;

use std::sync::{Arc, Mutex};

use framegraph_core::backend::CommandBuffer;
use framegraph_core::context::{Context, LinearCompiler};
use framegraph_core::error::Result;
use framegraph_core::pass::{DeclaredPass, DeclaredUsage, PassInstantiationContext, PassType, RenderPass};
use framegraph_core::queue::QueueId;
use framegraph_core::range::ActiveRange;
use framegraph_core::resource::{ResourceFlags, ResourceId, ResourceKind, ResourceShape};
use framegraph_core::usage::{StageFlags, UsageType};

use common::{Completion, Event, MockBackend};

struct NoopPass;

impl RenderPass for NoopPass {
    fn encode(&mut self, _buffer: &mut dyn CommandBuffer) -> Result<()> {
        Ok(())
    }
}

fn noop_factory() -> Box<dyn FnOnce(&PassInstantiationContext) -> Box<dyn RenderPass> + Send> {
    Box::new(|_ctx| Box::new(NoopPass))
}

fn pass(name: &str, queue: QueueId, uses: Vec<DeclaredUsage>) -> DeclaredPass {
    DeclaredPass {
        name: name.to_string(),
        pass_type: PassType::Draw,
        queue,
        resource_uses: uses,
        render_target: None,
        factory: noop_factory(),
    }
}

fn usage(resource: ResourceId, usage_type: UsageType, stages: StageFlags, active_range: ActiveRange) -> DeclaredUsage {
    DeclaredUsage { resource, usage_type, stages, active_range }
}

#[tokio::test]
async fn single_pass_clear() {
    let backend = MockBackend::new(1);
    let mut ctx = Context::new(backend.clone(), 2);
    let texture = ctx.declare_resource(
        ResourceKind::Texture,
        ResourceFlags::empty(),
        ResourceShape::Texture { mip_levels: 1, array_layers: 1 },
    );

    let passes = vec![pass(
        "clear",
        QueueId(0),
        vec![usage(texture, UsageType::RenderTargetColor, StageFlags::FRAGMENT, ActiveRange::full_resource())],
    )];

    ctx.execute_render_graph(passes, &mut LinearCompiler, None, None, None).await.unwrap();

    let events = backend.log.events();
    assert_eq!(events, vec![
        Event::Allocate(texture),
        Event::BeginEncoder { queue: QueueId(0), encoder: 0 },
        Event::Free(texture),
        Event::Commit { queue: QueueId(0) },
        Event::Completed { queue: QueueId(0) },
    ]);
    // The transient texture was disposed right after its last usage's
    // encoder, ahead of the command buffer that encoder belongs to being
    // committed; nothing stays materialized between frames.
    assert_eq!(ctx.materialized_resource_count(), 0);
}

#[tokio::test]
async fn write_then_read_within_an_encoder_emits_a_barrier_not_a_wait() {
    let backend = MockBackend::new(1);
    let mut ctx = Context::new(backend.clone(), 2);
    let buffer = ctx.declare_resource(ResourceKind::Buffer, ResourceFlags::empty(), ResourceShape::Buffer { length_bytes: 1024 });

    let passes = vec![
        pass("write", QueueId(0), vec![usage(buffer, UsageType::Write, StageFlags::COMPUTE, ActiveRange::Buffer(0..1024))]),
        pass("read", QueueId(0), vec![usage(buffer, UsageType::Read, StageFlags::COMPUTE, ActiveRange::Buffer(0..512))]),
    ];

    ctx.execute_render_graph(passes, &mut LinearCompiler, None, None, None).await.unwrap();

    let events = backend.log.events();
    // Both passes share a queue, so the partitioner places them in the same
    // encoder/command buffer: one allocate, one encoder, one commit.
    let begins: Vec<_> = events.iter().filter(|e| matches!(e, Event::BeginEncoder { .. })).collect();
    let commits: Vec<_> = events.iter().filter(|e| matches!(e, Event::Commit { .. })).collect();
    assert_eq!(begins.len(), 1);
    assert_eq!(commits.len(), 1);
}

#[tokio::test]
async fn subresource_split_writes_to_disjoint_mips_do_not_block_each_other() {
    let backend = MockBackend::new(1);
    let mut ctx = Context::new(backend.clone(), 2);
    let texture = ctx.declare_resource(
        ResourceKind::Texture,
        ResourceFlags::empty(),
        ResourceShape::Texture { mip_levels: 2, array_layers: 1 },
    );
    let mip0 = ActiveRange::Texture(smallvec::smallvec![framegraph_core::range::TextureRect { mips: 0..1, slices: 0..1 }]);
    let mip1 = ActiveRange::Texture(smallvec::smallvec![framegraph_core::range::TextureRect { mips: 1..2, slices: 0..1 }]);

    let passes = vec![
        pass("write_mip0", QueueId(0), vec![usage(texture, UsageType::Write, StageFlags::COMPUTE, mip0)]),
        pass("write_mip1", QueueId(0), vec![usage(texture, UsageType::Write, StageFlags::COMPUTE, mip1)]),
        pass("read_both", QueueId(0), vec![usage(texture, UsageType::Read, StageFlags::FRAGMENT, ActiveRange::full_resource())]),
    ];

    // All three passes share a queue, so this only exercises that the run
    // completes and materializes/frees the texture once — the subresource
    // independence itself is covered at the generator level, where the two
    // writes' disjoint active ranges can be inspected directly.
    ctx.execute_render_graph(passes, &mut LinearCompiler, None, None, None).await.unwrap();

    let events = backend.log.events();
    assert_eq!(events.iter().filter(|e| matches!(e, Event::Allocate(_))).count(), 1);
    assert_eq!(events.iter().filter(|e| matches!(e, Event::Free(_))).count(), 1);
}

#[tokio::test]
async fn read_read_write_both_reads_precede_the_write_with_no_dependency_between_them() {
    let backend = MockBackend::new(2);
    let mut ctx = Context::new(backend.clone(), 2);
    let buffer = ctx.declare_resource(ResourceKind::Buffer, ResourceFlags::PERSISTENT, ResourceShape::Buffer { length_bytes: 64 });

    // Distinct queues for each pass force the generalized partitioner (which
    // only splits encoders at a queue boundary) to keep all three passes in
    // separate encoders, matching the "all distinct encoders" setup this
    // scenario assumes.
    let passes = vec![
        pass("read1", QueueId(0), vec![usage(buffer, UsageType::Read, StageFlags::FRAGMENT, ActiveRange::full_resource())]),
        pass("read2", QueueId(1), vec![usage(buffer, UsageType::Read, StageFlags::FRAGMENT, ActiveRange::full_resource())]),
        pass("write", QueueId(0), vec![usage(buffer, UsageType::Write, StageFlags::COMPUTE, ActiveRange::full_resource())]),
    ];

    ctx.execute_render_graph(passes, &mut LinearCompiler, None, None, None).await.unwrap();

    // A freshly declared persistent resource is never initialized yet, so
    // its first touch materializes it like a transient one; subsequent
    // frames would instead take the prior-frame-wait path.
    let events = backend.log.events();
    assert!(events.iter().any(|e| matches!(e, Event::Allocate(_))));
    assert!(!events.iter().any(|e| matches!(e, Event::Free(_))), "a persistent resource is never recycled at frame end");
}

#[tokio::test]
async fn cross_queue_write_then_read_resolves_its_wait_against_the_real_submission_index() {
    // Queue 0 (the producer) completes only after two scheduler yields;
    // queue 1 (the consumer) completes synchronously. If the consumer's
    // encoder began recording before queue 0's completion was observed,
    // the cross-queue hazard this scenario exists to catch would have
    // silently gone unenforced.
    let backend = MockBackend::custom(vec![(QueueId(0), Completion::Deferred), (QueueId(1), Completion::Immediate)]);
    let mut ctx = Context::new(backend.clone(), 2);
    let texture = ctx.declare_resource(
        ResourceKind::Texture,
        ResourceFlags::PERSISTENT,
        ResourceShape::Texture { mip_levels: 1, array_layers: 1 },
    );

    let passes = vec![
        pass("write_p", QueueId(0), vec![usage(texture, UsageType::Write, StageFlags::COMPUTE, ActiveRange::full_resource())]),
        pass("read_p", QueueId(1), vec![usage(texture, UsageType::Read, StageFlags::FRAGMENT, ActiveRange::full_resource())]),
    ];

    ctx.execute_render_graph(passes, &mut LinearCompiler, None, None, None).await.unwrap();

    let events = backend.log.events();
    let index_of = |needle: &Event| events.iter().position(|e| e == needle).unwrap();
    let producer_completed = index_of(&Event::Completed { queue: QueueId(0) });
    let consumer_begin = index_of(&Event::BeginEncoder { queue: QueueId(1), encoder: 1 });
    assert!(
        producer_completed < consumer_begin,
        "consumer encoder began before the producer's completion was observed: {:?}",
        events
    );
}

#[tokio::test]
async fn persistent_resource_reused_across_frames_waits_on_the_prior_frames_writer() {
    let backend = MockBackend::custom(vec![(QueueId(0), Completion::Deferred), (QueueId(1), Completion::Immediate)]);
    let mut ctx = Context::new(backend.clone(), 2);
    let texture = ctx.declare_resource(
        ResourceKind::Texture,
        ResourceFlags::PERSISTENT,
        ResourceShape::Texture { mip_levels: 1, array_layers: 1 },
    );

    // Frame 0: queue 0 writes the persistent texture.
    let frame0 = vec![pass("write_p", QueueId(0), vec![usage(texture, UsageType::Write, StageFlags::COMPUTE, ActiveRange::full_resource())])];
    ctx.execute_render_graph(frame0, &mut LinearCompiler, None, None, None).await.unwrap();

    // Frame 1: queue 1 reads it. The generator resolves this as a
    // prior-frame wait (an already-known `WaitToken`, not a
    // `PendingCrossQueueWait`) since frame 0 has already fully committed.
    let frame1 = vec![pass("read_p", QueueId(1), vec![usage(texture, UsageType::Read, StageFlags::FRAGMENT, ActiveRange::full_resource())])];
    ctx.execute_render_graph(frame1, &mut LinearCompiler, None, None, None).await.unwrap();

    let events = backend.log.events();
    let producer_completed_index = events.iter().rposition(|e| *e == Event::Completed { queue: QueueId(0) }).unwrap();
    let consumer_begin_index = events.iter().rposition(|e| *e == Event::BeginEncoder { queue: QueueId(1), encoder: 0 }).unwrap();
    assert!(producer_completed_index < consumer_begin_index);
}

#[tokio::test]
async fn end_action_fires_in_enqueue_order_despite_out_of_order_completion() {
    // Immediate completion: `Context::commit` resolves the completion
    // handler synchronously, so there's no race between this test body
    // registering an end-action and the frame it targets actually
    // completing. Out-of-order-completion FIFO ordering is already
    // covered directly, without a real backend in the loop, by
    // `end_actions::tests`; this test's job is only to confirm `Context`
    // wires a real command-buffer index into `register` end to end.
    let backend = MockBackend::new(1);
    let mut ctx = Context::new(backend.clone(), 4);
    let a = ctx.declare_resource(ResourceKind::Buffer, ResourceFlags::empty(), ResourceShape::Buffer { length_bytes: 16 });
    let b = ctx.declare_resource(ResourceKind::Buffer, ResourceFlags::empty(), ResourceShape::Buffer { length_bytes: 16 });

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    // Frame 0 commits as command-buffer index 1, frame 1 as index 2 (the
    // counter starts at 1, not 0 — see `Context::new`) — `register`'s
    // `after_command_buffer` must match those exactly.
    {
        let order = order.clone();
        ctx.end_actions().register(1, Box::new(move || order.lock().unwrap().push("a1")));
    }

    let frame0 = vec![pass("write_a", QueueId(0), vec![usage(a, UsageType::Write, StageFlags::COMPUTE, ActiveRange::full_resource())])];
    ctx.execute_render_graph(frame0, &mut LinearCompiler, None, None, None).await.unwrap();

    {
        let order = order.clone();
        ctx.end_actions().register(2, Box::new(move || order.lock().unwrap().push("a2")));
    }

    let frame1 = vec![pass("write_b", QueueId(0), vec![usage(b, UsageType::Write, StageFlags::COMPUTE, ActiveRange::full_resource())])];
    ctx.execute_render_graph(frame1, &mut LinearCompiler, None, None, None).await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["a1", "a2"]);
}

#[tokio::test]
async fn backend_submit_failure_is_reported_and_does_not_panic() {
    let backend = MockBackend::with_completion(1, Completion::Fails);
    let mut ctx = Context::new(backend.clone(), 2);
    let buffer = ctx.declare_resource(ResourceKind::Buffer, ResourceFlags::empty(), ResourceShape::Buffer { length_bytes: 16 });
    let passes = vec![pass("write", QueueId(0), vec![usage(buffer, UsageType::Write, StageFlags::COMPUTE, ActiveRange::full_resource())])];

    let result = ctx.execute_render_graph(passes, &mut LinearCompiler, None, None, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn window_texture_allocation_failure_is_reported() {
    let backend = MockBackend::new(1);
    backend.set_window_texture_available(false);
    let mut ctx = Context::new(backend.clone(), 2);
    let texture = ctx.declare_resource(ResourceKind::Texture, ResourceFlags::WINDOW_HANDLE, ResourceShape::Texture { mip_levels: 1, array_layers: 1 });
    let passes = vec![pass(
        "present",
        QueueId(0),
        vec![usage(texture, UsageType::RenderTargetColor, StageFlags::FRAGMENT, ActiveRange::full_resource())],
    )];

    let result = ctx.execute_render_graph(passes, &mut LinearCompiler, None, None, None).await;
    assert!(matches!(result, Err(framegraph_core::error::GraphError::WindowTextureAllocation { .. })));
}

#[tokio::test]
async fn on_completion_receives_the_frames_command_buffer_range() {
    // A single-encoder, single-queue frame commits exactly one command
    // buffer. The counter starts at 1 (see `Context::new`), so the range
    // handed to `on_completion` must be `1..2`.
    let backend = MockBackend::new(1);
    let mut ctx = Context::new(backend.clone(), 2);
    let buffer = ctx.declare_resource(ResourceKind::Buffer, ResourceFlags::empty(), ResourceShape::Buffer { length_bytes: 16 });
    let passes = vec![pass("write", QueueId(0), vec![usage(buffer, UsageType::Write, StageFlags::COMPUTE, ActiveRange::full_resource())])];

    let observed: Arc<Mutex<Option<std::ops::Range<u64>>>> = Arc::new(Mutex::new(None));
    let on_completion = {
        let observed = observed.clone();
        Box::new(move |range: std::ops::Range<u64>| {
            *observed.lock().unwrap() = Some(range);
        })
    };

    ctx.execute_render_graph(passes, &mut LinearCompiler, None, None, Some(on_completion)).await.unwrap();

    assert_eq!(*observed.lock().unwrap(), Some(1..2));
}

#[tokio::test]
async fn register_window_texture_fails_with_zero_in_flight_capacity() {
    let backend = MockBackend::new(1);
    let ctx = Context::new(backend, 0);
    let texture = ResourceId::default();
    assert!(ctx.register_window_texture(texture).is_err());
}
