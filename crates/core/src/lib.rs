//! SerialQ core data models.
//!
//! This crate defines the values that flow through a step queue: the
//! execution context, the output directives that describe how results are
//! written into it, and the step values (including awaitable ones) that
//! steps hand back.

#![warn(missing_docs)]

// Identity
mod id;

// Context and binding rules
mod context;
mod directive;

// Step results
mod value;

// Re-exports
pub use id::QueueId;
pub use context::{kind_of, ExecutionContext};
pub use directive::{plain_keys, DirectiveError, KeyDirective};
pub use value::{Awaitable, StepValue};
