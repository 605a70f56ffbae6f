//! Error kinds surfaced by the execution core.
use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// A type-erased source error, used for backend/allocation failures whose
/// concrete type is only known to the backend implementation.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors the execution core can surface to a caller.
///
/// Unbalanced encoder boundaries and unbalanced debug-group push/pop are
/// deliberately absent here: those are programmer errors, caught with
/// `panic!`/`debug_assert!` at the point of detection rather than threaded
/// through as a recoverable `Result` variant.
#[derive(Debug, Error)]
pub enum GraphError {
    /// `commandBuffer.error` was non-nil after `commit`. The frame's
    /// `onCompletion` is still invoked; later frames proceed normally.
    #[error("command buffer {command_buffer_index} reported a submission error: {source}")]
    BackendSubmit {
        command_buffer_index: u64,
        #[source]
        source: BoxError,
    },

    /// Thrown from `allocateWindowHandleTexture`. Propagates out of
    /// `executeRenderGraph`; the in-flight slot is released by the caller.
    #[error("failed to allocate a window-handle texture: {source}")]
    WindowTextureAllocation {
        #[source]
        source: BoxError,
    },

    /// `registerWindowTexture` was called on a context built with zero
    /// in-flight frames (no transient registry exists to register into).
    /// Reported, then ignored by the caller.
    #[error("registerWindowTexture called on a context with zero in-flight frames")]
    NoTransientRegistry,

    /// A resource failed to materialize (allocate) during the pre-frame
    /// command walk. Aborts the current frame and releases the semaphore.
    #[error("resource allocation failed while materializing a transient resource: {source}")]
    ResourceAllocation {
        #[source]
        source: BoxError,
    },

    /// A cooperative cancellation signal fired while this task was waiting
    /// on a foreign queue's CPU-side completion.
    #[error("cancelled while waiting on a foreign queue")]
    Cancelled,
}

impl GraphError {
    pub fn backend_submit(command_buffer_index: u64, source: impl Into<BoxError>) -> Self {
        Self::BackendSubmit {
            command_buffer_index,
            source: source.into(),
        }
    }

    pub fn window_texture_allocation(source: impl Into<BoxError>) -> Self {
        Self::WindowTextureAllocation {
            source: source.into(),
        }
    }

    pub fn resource_allocation(source: impl Into<BoxError>) -> Self {
        Self::ResourceAllocation {
            source: source.into(),
        }
    }
}

/// A string-only error, used by tests and simple mock backends that don't
/// need their own error type hierarchy.
#[derive(Debug)]
pub struct SimpleError(pub String);

impl fmt::Display for SimpleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for SimpleError {}

impl From<&str> for SimpleError {
    fn from(s: &str) -> Self {
        SimpleError(s.to_owned())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
