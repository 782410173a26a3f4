//! Queue errors and the single error channel they funnel through.

use serialq_core::{DirectiveError, QueueId};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Every failure a queue can report.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The step function failed while it was being invoked
    #[error("step #{step} failed: {source:#}")]
    StepFault {
        /// Step sequence number
        step: u64,
        /// What the step reported
        #[source]
        source: anyhow::Error,
    },

    /// An awaited result value rejected
    #[error("step #{step} result {index} rejected: {source:#}")]
    Rejected {
        /// Step sequence number
        step: u64,
        /// Output position
        index: usize,
        /// Rejection reason
        #[source]
        source: anyhow::Error,
    },

    /// A value in an error slot turned out to be an error
    #[error("step #{step} reported an error at result {index}: {source:#}")]
    Tagged {
        /// Step sequence number
        step: u64,
        /// Output position
        index: usize,
        /// The reported error
        #[source]
        source: anyhow::Error,
    },

    /// A result could not be written into the context
    #[error("step #{step} result {index} could not be bound: {source}")]
    Binding {
        /// Step sequence number
        step: u64,
        /// Output position
        index: usize,
        /// Why the directive failed
        #[source]
        source: DirectiveError,
    },

    /// The completion handler itself failed
    #[error("completion handler failed: {0:#}")]
    CompletionHandler(#[source] anyhow::Error),

    /// The queue stopped without ever reaching completion
    #[error("queue {0} stopped before completing")]
    Stalled(QueueId),

    /// No Tokio runtime to defer work onto
    #[error("no Tokio runtime available for deferred dispatch")]
    NoRuntime,
}

impl QueueError {
    /// Sequence number of the step that caused the error, if any.
    pub fn step(&self) -> Option<u64> {
        match self {
            Self::StepFault { step, .. }
            | Self::Rejected { step, .. }
            | Self::Tagged { step, .. }
            | Self::Binding { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// A registered error handler.
pub type ErrorHandler = Arc<dyn Fn(QueueError) + Send + Sync>;

/// Single registered failure sink of a queue.
#[derive(Clone, Default)]
pub struct ErrorChannel {
    handler: Option<ErrorHandler>,
}

impl ErrorChannel {
    /// Register `handler`, replacing any previous one.
    pub fn register(&mut self, handler: ErrorHandler) {
        self.handler = Some(handler);
    }

    /// Whether a handler is registered.
    pub fn is_registered(&self) -> bool {
        self.handler.is_some()
    }

    /// Hand `error` to the registered handler, or escalate it.
    ///
    /// Takes the channel by value so callers can clone it out of a lock
    /// before invoking user code.
    pub fn raise(self, queue: QueueId, error: QueueError) {
        match self.handler {
            Some(handler) => handler(error),
            None => escalate(queue, error),
        }
    }
}

impl std::fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// An error nobody is listening for is fatal to the running task.
fn escalate(queue: QueueId, error: QueueError) -> ! {
    error!(queue = %queue, error = %error, "unhandled queue error");
    panic!("unhandled error in queue {queue}: {error}");
}
