//! Step result values and the awaitable capability.

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;

/// Anything that eventually resolves to a JSON value or rejects.
///
/// Every `Future` yielding `anyhow::Result<Value>` is awaitable, so async
/// blocks can be handed to a completion callback directly.
pub trait Awaitable: Send {
    /// Wait for the value.
    fn resolve(self: Box<Self>) -> BoxFuture<'static, anyhow::Result<Value>>;
}

impl<F> Awaitable for F
where
    F: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn resolve(self: Box<Self>) -> BoxFuture<'static, anyhow::Result<Value>> {
        Box::into_pin(self)
    }
}

/// One positional value handed to a step's completion callback.
pub enum StepValue {
    /// Already resolved
    Ready(Value),

    /// An error-like value; only meaningful under an `ErrorSlot` directive
    Error(anyhow::Error),

    /// Resolved by the binder before it is written
    Pending(Box<dyn Awaitable>),
}

impl StepValue {
    /// Wrap an awaitable.
    pub fn pending<A>(awaitable: A) -> Self
    where
        A: Awaitable + 'static,
    {
        Self::Pending(Box::new(awaitable))
    }

    /// Wrap an error-like value.
    pub fn error(error: impl Into<anyhow::Error>) -> Self {
        Self::Error(error.into())
    }

    /// The JSON `null` value.
    pub fn null() -> Self {
        Self::Ready(Value::Null)
    }

    /// Whether this value must be awaited.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Whether this value is error-like.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<Value> for StepValue {
    fn from(value: Value) -> Self {
        Self::Ready(value)
    }
}

impl std::fmt::Debug for StepValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}
