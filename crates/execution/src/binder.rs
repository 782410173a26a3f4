//! Result binding - writes a completed step's values into the context.

use crate::error::QueueError;
use crate::queue::panic_message;
use futures::FutureExt;
use serde_json::Value;
use serialq_core::{DirectiveError, KeyDirective, StepValue};
use std::panic::AssertUnwindSafe;
use tracing::debug;

/// Where the binder writes and reports.
pub(crate) trait BindTarget: Sync {
    /// Apply one directive to the context.
    fn apply(&self, directive: &KeyDirective, value: Value) -> Result<(), DirectiveError>;

    /// Report a failure on the error channel.
    fn raise(&self, error: QueueError);
}

/// How binding ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindOutcome {
    /// Every position was processed
    Complete,
    /// Stopped at the given position after reporting an error
    Abandoned(usize),
}

enum Resolved {
    Value(Value),
    Error(anyhow::Error),
}

/// Binds one step's values, strictly left to right.
pub(crate) struct ResultBinder<'a, T: BindTarget> {
    target: &'a T,
    step: u64,
}

impl<'a, T: BindTarget> ResultBinder<'a, T> {
    pub(crate) fn new(target: &'a T, step: u64) -> Self {
        Self { target, step }
    }

    /// Walk `max(directives, values)` positions.
    ///
    /// A pending value is awaited before anything at a later position is
    /// written. Positions without a directive are still resolved, then
    /// dropped; positions without a value bind `null`.
    pub(crate) async fn bind(&self, directives: Vec<KeyDirective>, values: Vec<StepValue>) -> BindOutcome {
        let len = directives.len().max(values.len());
        let mut directives = directives.into_iter();
        let mut values = values.into_iter();

        for index in 0..len {
            let directive = directives.next();
            let value = values.next().unwrap_or_else(StepValue::null);

            let resolved = match value {
                StepValue::Ready(value) => Resolved::Value(value),
                StepValue::Error(error) => Resolved::Error(error),
                StepValue::Pending(awaitable) => {
                    debug!(step = self.step, index, "awaiting result value");
                    let outcome = match AssertUnwindSafe(awaitable.resolve()).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(payload) => Err(anyhow::anyhow!(
                            "result value panicked: {}",
                            panic_message(payload.as_ref())
                        )),
                    };
                    match outcome {
                        Ok(value) => Resolved::Value(value),
                        Err(source) => {
                            self.target.raise(QueueError::Rejected {
                                step: self.step,
                                index,
                                source,
                            });
                            return BindOutcome::Abandoned(index);
                        }
                    }
                }
            };

            let Some(directive) = directive else {
                continue;
            };

            let value = match (&directive, resolved) {
                (KeyDirective::ErrorSlot, Resolved::Error(source)) => {
                    self.target.raise(QueueError::Tagged {
                        step: self.step,
                        index,
                        source,
                    });
                    continue;
                }
                (KeyDirective::ErrorSlot, Resolved::Value(_)) => continue,
                (_, Resolved::Error(error)) => Value::String(format!("{error:#}")),
                (_, Resolved::Value(value)) => value,
            };

            if let Err(source) = self.target.apply(&directive, value) {
                self.target.raise(QueueError::Binding {
                    step: self.step,
                    index,
                    source,
                });
                return BindOutcome::Abandoned(index);
            }
        }

        BindOutcome::Complete
    }
}
