//! In-memory mock backend for integration tests, grounded on `zangfx_test`'s
//! own role in its source codebase's test suite: a backend implementation
//! whose only purpose is to be driven by generic scheduling code under
//! test, not to touch real hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use framegraph_core::backend::{Backend, BackendResourceRef, CommandBuffer, CommandBufferRef, CommandQueue, CommandQueueRef, ResourceAllocator};
use framegraph_core::error::{GraphError, Result, SimpleError};
use framegraph_core::queue::QueueId;
use framegraph_core::resource::{ResourceId, ResourceShape};

/// One recorded event, in the order the mock backend observed it. Tests
/// assert against this log rather than against backend-internal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Allocate(ResourceId),
    AllocateWindowTexture(ResourceId),
    Free(ResourceId),
    BeginEncoder { queue: QueueId, encoder: u32 },
    Commit { queue: QueueId },
    /// The backend reported this command buffer's GPU work complete —
    /// logged at the point the completion handler actually runs, which for
    /// [`Completion::Deferred`] is well after `Commit` was logged.
    Completed { queue: QueueId },
}

#[derive(Default)]
pub struct EventLog(Mutex<Vec<Event>>);

impl EventLog {
    pub fn record(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

struct MockResource;

pub struct MockAllocator {
    log: Arc<EventLog>,
    window_texture_available: Mutex<bool>,
}

impl ResourceAllocator for MockAllocator {
    fn allocate(&self, resource: ResourceId, _shape: ResourceShape) -> Result<BackendResourceRef> {
        self.log.record(Event::Allocate(resource));
        Ok(Box::new(MockResource))
    }

    fn allocate_window_handle_texture(&self, resource: ResourceId) -> Result<BackendResourceRef> {
        if !*self.window_texture_available.lock().unwrap() {
            return Err(GraphError::window_texture_allocation(SimpleError::from("no drawable registered")));
        }
        self.log.record(Event::AllocateWindowTexture(resource));
        Ok(Box::new(MockResource))
    }

    fn free(&self, resource: ResourceId, _handle: BackendResourceRef) {
        self.log.record(Event::Free(resource));
    }
}

/// A single-use mock command buffer. `completion` controls what happens
/// when the buffer is committed: `Immediate` resolves the registered
/// completion handler synchronously (the common case — most scenarios don't
/// care about the gap between commit and completion), `Deferred` hands it
/// off to a spawned task so tests can exercise the polling wait loop in
/// [`framegraph_core::context::Context::execute_render_graph`] against a
/// completion that genuinely hasn't happened yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Immediate,
    Deferred,
    Fails,
}

pub struct MockCommandBuffer {
    queue: QueueId,
    log: Arc<EventLog>,
    completion: Completion,
    handler: Mutex<Option<Box<dyn FnOnce(Option<&str>) + Send>>>,
}

impl CommandBuffer for MockCommandBuffer {
    fn queue(&self) -> QueueId {
        self.queue
    }

    fn begin_encoder(&mut self, encoder_index: u32) -> Result<()> {
        self.log.record(Event::BeginEncoder { queue: self.queue, encoder: encoder_index });
        Ok(())
    }

    fn end_encoder(&mut self) -> Result<()> {
        Ok(())
    }

    fn add_completion_handler(&mut self, handler: Box<dyn FnOnce(Option<&str>) + Send>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.log.record(Event::Commit { queue: self.queue });
        let queue = self.queue;
        let log = self.log.clone();
        let handler = self.handler.into_inner().unwrap();
        match self.completion {
            Completion::Immediate => {
                if let Some(handler) = handler {
                    log.record(Event::Completed { queue });
                    handler(None);
                }
                Ok(())
            }
            Completion::Deferred => {
                if let Some(handler) = handler {
                    tokio::spawn(async move {
                        tokio::task::yield_now().await;
                        tokio::task::yield_now().await;
                        log.record(Event::Completed { queue });
                        handler(None);
                    });
                }
                Ok(())
            }
            Completion::Fails => {
                if let Some(handler) = handler {
                    log.record(Event::Completed { queue });
                    handler(Some("mock backend failure"));
                }
                Err(GraphError::backend_submit(queue.0 as u64, SimpleError::from("mock backend failure")))
            }
        }
    }
}

pub struct MockCommandQueue {
    id: QueueId,
    log: Arc<EventLog>,
    completion: Completion,
}

impl CommandQueue for MockCommandQueue {
    fn id(&self) -> QueueId {
        self.id
    }

    fn make_command_buffer(&self) -> Result<CommandBufferRef> {
        Ok(Box::new(MockCommandBuffer {
            queue: self.id,
            log: self.log.clone(),
            completion: self.completion,
            handler: Mutex::new(None),
        }))
    }
}

pub struct MockBackend {
    allocator: MockAllocator,
    queues: HashMap<QueueId, CommandQueueRef>,
    pub log: Arc<EventLog>,
}

impl MockBackend {
    /// Builds a backend exposing queues `0..queue_count`, all completing
    /// their command buffers synchronously on commit.
    pub fn new(queue_count: u8) -> Arc<Self> {
        Self::with_completion(queue_count, Completion::Immediate)
    }

    pub fn with_completion(queue_count: u8, completion: Completion) -> Arc<Self> {
        Self::custom((0..queue_count).map(|i| (QueueId(i), completion)).collect())
    }

    /// Builds a backend with one queue per entry, each with its own
    /// completion behavior — needed to test a cross-queue wait where the
    /// producer queue's completion genuinely lags behind the consumer
    /// reaching its wait point.
    pub fn custom(per_queue: Vec<(QueueId, Completion)>) -> Arc<Self> {
        let log = Arc::new(EventLog::default());
        let queues = per_queue
            .into_iter()
            .map(|(id, completion)| {
                let queue: CommandQueueRef = Arc::new(MockCommandQueue { id, log: log.clone(), completion });
                (id, queue)
            })
            .collect();
        Arc::new(MockBackend {
            allocator: MockAllocator { log: log.clone(), window_texture_available: Mutex::new(true) },
            queues,
            log,
        })
    }

    pub fn set_window_texture_available(&self, available: bool) {
        *self.allocator.window_texture_available.lock().unwrap() = available;
    }
}

impl Backend for MockBackend {
    fn allocator(&self) -> &dyn ResourceAllocator {
        &self.allocator
    }

    fn queue(&self, id: QueueId) -> CommandQueueRef {
        self.queues.get(&id).expect("queue not configured on mock backend").clone()
    }
}
