//! Sequential map over a list of items, driven by a step queue.

use crate::error::QueueError;
use crate::queue::{lock, StepQueue};
use crate::scheduler::QueueConfig;
use serde_json::Value;
use serialq_core::{ExecutionContext, KeyDirective, StepValue};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::debug;

const RESULTS: &str = "results";

type Outcome = Arc<Mutex<Option<oneshot::Sender<Result<Vec<Value>, QueueError>>>>>;

/// Run `per_item` for every item, one at a time and in order.
///
/// Resolves with the outputs in input order. The first failure rejects the
/// whole map and no later item is started.
pub async fn map_sequence<I, T, F, Fut>(
    config: QueueConfig,
    items: I,
    per_item: F,
) -> Result<Vec<Value>, QueueError>
where
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let seed: ExecutionContext = [(RESULTS, Value::Array(Vec::new()))].into_iter().collect();
    let queue = StepQueue::with_context(config, seed);
    let (tx, rx) = oneshot::channel();
    let outcome: Outcome = Arc::new(Mutex::new(Some(tx)));

    let on_failure = outcome.clone();
    queue.on_error(move |error| settle(&on_failure, Err(error)));

    let on_success = outcome.clone();
    queue.on_complete(move |context, _| {
        let results = match context.get(RESULTS) {
            Some(Value::Array(results)) => results.clone(),
            _ => Vec::new(),
        };
        settle(&on_success, Ok(results));
        Ok(())
    });

    let per_item = Arc::new(Mutex::new(per_item));
    let mut count = 0usize;
    for item in items {
        let per_item = per_item.clone();
        let outcome = outcome.clone();
        queue.step([KeyDirective::push(RESULTS)], move |_, queue| {
            let settled = lock(&outcome).is_none();
            if settled {
                // An earlier item already failed.
                queue.finish();
                return Ok(StepValue::Ready(Value::Null));
            }
            let future = {
                let mut per_item = lock(&per_item);
                (&mut *per_item)(item)
            };
            Ok(StepValue::pending(future))
        });
        count += 1;
    }

    debug!(queue = %queue.id(), items = count, "mapping sequence");
    if count == 0 {
        queue.finish();
    }

    // Only the queue's handlers may keep the sender alive, so a stalled
    // queue surfaces as a closed channel.
    drop(outcome);
    let id = queue.id();
    drop(queue);
    rx.await.unwrap_or(Err(QueueError::Stalled(id)))
}

fn settle(outcome: &Outcome, result: Result<Vec<Value>, QueueError>) {
    if let Some(tx) = lock(outcome).take() {
        let _ = tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DeferralStrategy;
    use std::time::Duration;

    fn config() -> QueueConfig {
        QueueConfig::detect().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_input_order() {
        // Earlier items take longer, so completion order would differ.
        let results = map_sequence(config(), [30u64, 20, 10], |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, anyhow::Error>(Value::from(delay))
        })
        .await
        .unwrap();

        assert_eq!(results, vec![Value::from(30), Value::from(20), Value::from(10)]);
    }

    #[tokio::test]
    async fn test_empty_input_resolves_immediately() {
        let results = map_sequence(config(), Vec::<u32>::new(), |n| async move {
            Ok::<_, anyhow::Error>(Value::from(n))
        })
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_rejects_and_stops() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let log = started.clone();

        let err = map_sequence(config(), 1..=4, move |n: u32| {
            log.lock().unwrap().push(n);
            async move {
                if n == 2 {
                    anyhow::bail!("item {n} failed");
                }
                Ok(Value::from(n))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, QueueError::Rejected { step: 1, index: 0, .. }));
        assert!(err.to_string().contains("item 2 failed"));

        // Give the queue a chance to run anything it should not.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(*started.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_panicking_item_rejects_instead_of_hanging() {
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            map_sequence(config(), [1u32, 2, 3], |n| async move {
                if n == 2 {
                    panic!("item {n} blew up");
                }
                Ok::<_, anyhow::Error>(Value::from(n))
            }),
        )
        .await
        .expect("map_sequence should settle");

        let err = outcome.unwrap_err();
        assert!(matches!(err, QueueError::Rejected { step: 1, index: 0, .. }));
        assert!(err.to_string().contains("item 2 blew up"));
    }

    #[tokio::test]
    async fn test_stalled_queue_reports_stalled() {
        // The dispatch task is lost when its runtime goes away, leaving the
        // queue stalled with nothing left to settle the map.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let config = QueueConfig::new(DeferralStrategy::Spawn(runtime.handle().clone()));
        runtime.shutdown_background();

        let err = map_sequence(config, [1u32], |n| async move {
            Ok::<_, anyhow::Error>(Value::from(n))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, QueueError::Stalled(_)));
    }
}
