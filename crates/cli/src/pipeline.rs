//! Declarative pipelines - JSON files describing a queue to run.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use serialq_core::{ExecutionContext, KeyDirective, StepValue};
use serialq_execution::{QueueConfig, QueueError, StepQueue};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;

/// A pipeline definition.
#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    /// Context the queue starts with
    #[serde(default)]
    pub context: Map<String, Value>,

    /// Steps, in order
    pub steps: Vec<StepDef>,
}

/// One step of a pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepDef {
    /// Complete with the given values
    Emit {
        /// How the values are bound
        #[serde(default)]
        outputs: Vec<KeyDirective>,
        /// The values
        #[serde(default)]
        values: Vec<ValueDef>,
    },

    /// Run a nested pipeline and bind the listed keys from its context
    SubQueue {
        /// Keys copied out of the nested context
        keys: Vec<String>,
        /// Nested steps
        steps: Vec<StepDef>,
    },

    /// Stop the queue here, dropping every later step
    Finish,
}

/// A value produced by an `emit` step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueDef {
    /// Available immediately
    Ready(Value),

    /// Available after a delay
    Delayed {
        /// The value
        value: Value,
        /// Delay in milliseconds
        ms: u64,
    },

    /// An error-like value
    Error(String),

    /// A pending value that rejects after a delay
    Reject {
        /// Rejection message
        message: String,
        /// Delay in milliseconds
        #[serde(default)]
        ms: u64,
    },
}

impl ValueDef {
    fn into_step_value(self) -> StepValue {
        match self {
            Self::Ready(value) => StepValue::Ready(value),
            Self::Delayed { value, ms } => StepValue::pending(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, anyhow::Error>(value)
            }),
            Self::Error(message) => StepValue::error(anyhow::anyhow!(message)),
            Self::Reject { message, ms } => StepValue::pending(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Err::<Value, _>(anyhow::anyhow!(message))
            }),
        }
    }
}

impl Pipeline {
    /// Load a pipeline from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading pipeline {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing pipeline {}", path.display()))
    }

    /// Total number of steps, nested ones included.
    pub fn step_count(&self) -> usize {
        count_steps(&self.steps)
    }

    /// Run the pipeline to completion, returning the final context.
    ///
    /// The first error stops the run.
    pub async fn run(self, config: QueueConfig) -> Result<ExecutionContext, QueueError> {
        let queue = StepQueue::with_context(config, ExecutionContext::from(self.context));
        let (tx, rx) = oneshot::channel();
        let outcome = Arc::new(Mutex::new(Some(tx)));

        let on_failure = outcome.clone();
        queue.on_error(move |error| {
            if let Some(tx) = on_failure.lock().unwrap_or_else(|p| p.into_inner()).take() {
                let _ = tx.send(Err(error));
            }
        });
        queue.on_complete(move |context, _| {
            if let Some(tx) = outcome.lock().unwrap_or_else(|p| p.into_inner()).take() {
                let _ = tx.send(Ok(context.as_ref().clone()));
            }
            Ok(())
        });

        info!(queue = %queue.id(), steps = self.steps.len(), "running pipeline");
        enqueue_all(&queue, self.steps);

        let id = queue.id();
        drop(queue);
        rx.await.unwrap_or(Err(QueueError::Stalled(id)))
    }
}

fn count_steps(steps: &[StepDef]) -> usize {
    steps
        .iter()
        .map(|step| match step {
            StepDef::SubQueue { steps, .. } => 1 + count_steps(steps),
            _ => 1,
        })
        .sum()
}

fn enqueue_all(queue: &StepQueue, steps: Vec<StepDef>) {
    if steps.is_empty() {
        queue.finish();
        return;
    }
    for step in steps {
        match step {
            StepDef::Emit { outputs, values } => {
                queue.callback_step(outputs, move |complete, _, _| {
                    complete.complete(values.into_iter().map(ValueDef::into_step_value));
                    Ok(())
                });
            }
            StepDef::SubQueue { keys, steps } => {
                queue.sub_queue(keys, move |nested, _, _| {
                    enqueue_all(&nested, steps);
                    Ok(())
                });
            }
            StepDef::Finish => {
                queue.callback_step(Vec::<KeyDirective>::new(), |complete, _, queue| {
                    queue.finish();
                    complete.done();
                    Ok(())
                });
            }
        }
    }
}
