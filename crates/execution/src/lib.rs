//! Execution layer - the sequential step queue.
//!
//! Steps run one at a time, each dispatched on a later scheduling turn.
//! Their results are bound into a shared [`ExecutionContext`] according to
//! per-step [`KeyDirective`]s, awaiting pending values in order, and every
//! failure is routed to a single error handler.
//!
//! [`ExecutionContext`]: serialq_core::ExecutionContext
//! [`KeyDirective`]: serialq_core::KeyDirective

#![warn(missing_docs)]

mod binder;
pub mod error;
pub mod map;
pub mod queue;
pub mod scheduler;
mod subqueue;

pub use error::{ErrorChannel, ErrorHandler, QueueError};
pub use map::map_sequence;
pub use queue::{Completion, CompletionHandler, StepQueue};
pub use scheduler::{DeferralStrategy, QueueConfig};
