//! The command-end action manager: runs caller-supplied
//! closures once a command buffer's GPU work is observed complete, in the
//! same order the command buffers were submitted, even though completion
//! callbacks themselves can fire out of order.
//!
//! Grounded on `cbtasks::CmdBufferTaskBuilder`'s fence-cell handoff between
//! its encode and submit tasks: there, a later command buffer's submit
//! task blocks on a cell written by the one before it. This module
//! generalizes that single-producer chain into a FIFO of arbitrary
//! end-actions keyed by command-buffer index, driven by completion
//! notifications instead of a blocking cell read, so it can be satisfied
//! from a tokio completion-handler callback without occupying a worker
//! thread in the meantime.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// One pending action: run `action` once `after_command_buffer`'s fence
/// has signalled. Boxed rather than generic because a frame can register
/// actions from several unrelated subsystems (readback callbacks,
/// telemetry, resource recycling) that don't share a type.
pub type EndAction = Box<dyn FnOnce() + Send>;

struct PendingAction {
    after_command_buffer: u64,
    action: EndAction,
}

#[derive(Default)]
struct State {
    last_completed: u64,
    queue: VecDeque<PendingAction>,
}

/// FIFO dispatcher for end-of-command-buffer actions. One instance is
/// shared (via `Arc`) by every in-flight frame that submits work on the
/// same queue, since actions must run in submission order regardless of
/// which frame registered them.
pub struct CommandEndActionManager {
    state: Mutex<State>,
    notify: Notify,
}

impl Default for CommandEndActionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandEndActionManager {
    pub fn new() -> Self {
        CommandEndActionManager {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Registers `action` to run once `after_command_buffer`'s completion
    /// has been reported via [`Self::notify_completed`], and every action
    /// registered for an earlier command buffer has already run.
    pub fn register(&self, after_command_buffer: u64, action: EndAction) {
        let mut state = self.state.lock();
        if after_command_buffer <= state.last_completed && state.queue.is_empty() {
            drop(state);
            action();
            return;
        }
        state.queue.push_back(PendingAction { after_command_buffer, action });
    }

    /// Called from a backend completion handler (possibly on an arbitrary
    /// thread) once `command_buffer_index` has finished executing.
    /// Completion handlers can fire out of order; actions still run in
    /// command-buffer order because a later command buffer's actions stay
    /// queued until every earlier index has been marked complete.
    pub fn notify_completed(&self, command_buffer_index: u64) {
        let mut ready = Vec::new();
        {
            let mut state = self.state.lock();
            if command_buffer_index <= state.last_completed {
                return;
            }
            state.last_completed = command_buffer_index;
            while let Some(front) = state.queue.front() {
                if front.after_command_buffer > state.last_completed {
                    break;
                }
                ready.push(state.queue.pop_front().unwrap().action);
            }
        }
        for action in ready {
            action();
        }
        self.notify.notify_waiters();
    }

    /// Awaits the point at which every command buffer up to and including
    /// `command_buffer_index` has completed and had its end-actions run.
    /// Used by a frame that needs to block its own in-flight slot release
    /// on a prior frame's GPU work finishing.
    pub async fn wait_for(&self, command_buffer_index: u64) {
        loop {
            {
                let state = self.state.lock();
                if state.last_completed >= command_buffer_index {
                    return;
                }
            }
            self.notify.notified().await;
        }
    }
}
