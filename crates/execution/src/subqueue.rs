//! Sub-queue delegation - one outer step backed by a nested pipeline.

use crate::queue::StepQueue;
use serialq_core::{plain_keys, ExecutionContext, StepValue};
use std::sync::Arc;
use tracing::debug;

impl StepQueue {
    /// Queue a step that runs a nested queue.
    ///
    /// The nested queue starts with an empty context and this queue's
    /// configuration. Its errors are forwarded to this queue's error
    /// channel. When it drains (or is finished) the values under `keys` are
    /// copied out of its context, in order, and bound here as if the outer
    /// step had completed with them.
    ///
    /// The delegate receives `(nested, outer context, outer queue)`. A
    /// delegate that queues nothing must call `nested.finish()` itself.
    pub fn sub_queue<K, S, F>(&self, keys: K, delegate: F) -> &Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(StepQueue, Arc<ExecutionContext>, StepQueue) -> anyhow::Result<()> + Send + 'static,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let directives = plain_keys(keys.iter().cloned());

        self.callback_step(directives, move |complete, context, parent| {
            let nested = StepQueue::new(parent.config().clone());
            debug!(queue = %parent.id(), nested = %nested.id(), step = complete.step(), "delegating to sub-queue");

            let forward = parent.clone();
            nested.on_error(move |error| forward.raise(error));
            nested.on_complete(move |nested_context, _| {
                let values = nested_context
                    .extract(keys.iter().map(String::as_str))
                    .into_iter()
                    .map(StepValue::Ready);
                complete.complete(values);
                Ok(())
            });

            delegate(nested, context, parent)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::QueueConfig;
    use super::*;
    use serde_json::json;
    use serialq_core::KeyDirective;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_nested_queue_context_is_isolated() {
        let outer = StepQueue::new(QueueConfig::detect().unwrap());
        let (tx, rx) = oneshot::channel();

        outer.step([KeyDirective::plain("outer_only")], |_, _| Ok(json!(true)));
        outer.sub_queue(["found"], |nested, outer_context, _| {
            let seen_outer = outer_context.contains_key("outer_only");
            nested.step([KeyDirective::plain("found")], move |ctx, _| {
                Ok(json!({"outer_visible": seen_outer, "nested_had_outer": ctx.contains_key("outer_only")}))
            });
            Ok(())
        });
        outer.on_complete(move |ctx, _| {
            let _ = tx.send(ctx);
            Ok(())
        });

        let ctx = rx.await.unwrap();
        assert_eq!(
            ctx.get("found"),
            Some(&json!({"outer_visible": true, "nested_had_outer": false}))
        );
    }

    #[tokio::test]
    async fn test_empty_delegate_finishes_explicitly() {
        let outer = StepQueue::new(QueueConfig::detect().unwrap());
        let (tx, rx) = oneshot::channel();

        outer.sub_queue(["a"], |nested, _, _| {
            nested.finish();
            Ok(())
        });
        outer.on_complete(move |ctx, _| {
            let _ = tx.send(ctx);
            Ok(())
        });

        let ctx = rx.await.unwrap();
        assert_eq!(ctx.get("a"), Some(&serde_json::Value::Null));
    }
}
