use serde_json::json;
use serialq_core::{plain_keys, ExecutionContext, KeyDirective};
use serialq_execution::{map_sequence, QueueConfig, StepQueue};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

fn queue() -> StepQueue {
    StepQueue::new(QueueConfig::detect().unwrap().with_label("outer"))
}

fn drained(queue: &StepQueue) -> oneshot::Receiver<Arc<ExecutionContext>> {
    let (tx, rx) = oneshot::channel();
    queue.on_complete(move |ctx, _| {
        let _ = tx.send(ctx);
        Ok(())
    });
    rx
}

#[tokio::test]
async fn test_sub_queue_results_become_outer_outputs() {
    let outer = queue();
    let done = drained(&outer);

    outer.sub_queue(["a", "b"], |nested, _, _| {
        nested
            .step(plain_keys(["a"]), |_, _| Ok(json!(1)))
            .step(plain_keys(["b"]), |_, _| Ok(json!(2)))
            .step(plain_keys(["scratch"]), |_, _| Ok(json!("nested only")));
        Ok(())
    });

    let ctx = done.await.unwrap();
    assert_eq!(ctx.get("a"), Some(&json!(1)));
    assert_eq!(ctx.get("b"), Some(&json!(2)));
    assert!(!ctx.contains_key("scratch"));
}

#[tokio::test(start_paused = true)]
async fn test_sub_queue_is_atomic_for_the_outer_queue() {
    let outer = queue();
    let done = drained(&outer);
    let order = Arc::new(Mutex::new(Vec::new()));

    let log = order.clone();
    outer.sub_queue(["inner"], move |nested, _, _| {
        let first = log.clone();
        nested.async_step(plain_keys(["inner"]), move |_, _| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            first.lock().unwrap().push("nested step");
            Ok::<_, anyhow::Error>(json!("done"))
        });
        Ok(())
    });
    let log = order.clone();
    outer.step(plain_keys(["after"]), move |ctx, _| {
        log.lock().unwrap().push("outer step");
        Ok(ctx.get("inner").cloned().unwrap_or_default())
    });

    let ctx = done.await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["nested step", "outer step"]);
    assert_eq!(ctx.get("after"), Some(&json!("done")));
}

#[tokio::test]
async fn test_sub_queue_errors_reach_parent_channel() {
    let outer = queue();
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    outer.on_error(move |e| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(e.to_string());
        }
    });

    outer.sub_queue(["a"], |nested, _, _| {
        nested.step(plain_keys(["a"]), |_, _| -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("nested failure")
        });
        Ok(())
    });

    assert_eq!(rx.await.unwrap(), "step #0 failed: nested failure");
}

#[tokio::test]
async fn test_nested_sub_queues_compose() {
    let outer = queue();
    let done = drained(&outer);

    outer.sub_queue(["deep"], |middle, _, _| {
        middle.sub_queue(["deep"], |inner, _, _| {
            inner.step(plain_keys(["deep"]), |_, _| Ok(json!("from the bottom")));
            Ok(())
        });
        Ok(())
    });

    let ctx = done.await.unwrap();
    assert_eq!(ctx.get("deep"), Some(&json!("from the bottom")));
}

#[tokio::test]
async fn test_map_sequence_inside_a_step() {
    let outer = queue();
    let done = drained(&outer);
    let config = outer.config().clone();

    outer.async_step([KeyDirective::plain("squares")], move |_, _| async move {
        let squares = map_sequence(config, 1..=4u64, |n| async move {
            Ok::<_, anyhow::Error>(json!(n * n))
        })
        .await?;
        Ok::<_, anyhow::Error>(serde_json::Value::Array(squares))
    });

    let ctx = done.await.unwrap();
    assert_eq!(ctx.get("squares"), Some(&json!([1, 4, 9, 16])));
}
