//! Deferral strategy and queue configuration.

use crate::error::QueueError;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};

/// How a queue pushes work onto a future scheduling turn.
///
/// Chosen once when the queue is configured and never re-evaluated. None of
/// the strategies ever run the deferred work on the caller's stack.
#[derive(Debug, Clone)]
pub enum DeferralStrategy {
    /// Spawn a task on the captured runtime
    Spawn(Handle),

    /// Spawn a task that yields once before running
    Yield(Handle),

    /// Spawn a task that sleeps for the delay before running
    Timer(Handle, Duration),
}

impl DeferralStrategy {
    /// Pick a strategy for the ambient Tokio runtime.
    ///
    /// A multi-threaded runtime gets plain spawning; a current-thread runtime
    /// yields first so the enqueuing task always gets to finish its turn.
    pub fn detect() -> Result<Self, QueueError> {
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        Ok(match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => Self::Spawn(handle),
            _ => Self::Yield(handle),
        })
    }

    /// Timer strategy on the ambient runtime.
    pub fn timer(delay: Duration) -> Result<Self, QueueError> {
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        Ok(Self::Timer(handle, delay))
    }

    /// Short name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "spawn",
            Self::Yield(_) => "yield",
            Self::Timer(..) => "timer",
        }
    }

    /// Run `task` on a later turn.
    pub fn defer<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            Self::Spawn(handle) => {
                handle.spawn(task);
            }
            Self::Yield(handle) => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    task.await;
                });
            }
            Self::Timer(handle, delay) => {
                let delay = *delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    task.await;
                });
            }
        }
    }
}

/// Configuration for a step queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How step dispatch is deferred
    pub deferral: DeferralStrategy,
    /// Optional label attached to log lines
    pub label: Option<String>,
}

impl QueueConfig {
    /// Create a configuration around an explicit deferral strategy.
    pub fn new(deferral: DeferralStrategy) -> Self {
        Self {
            deferral,
            label: None,
        }
    }

    /// Create a configuration for the ambient Tokio runtime.
    pub fn detect() -> Result<Self, QueueError> {
        Ok(Self::new(DeferralStrategy::detect()?))
    }

    /// Set the deferral strategy.
    pub fn with_deferral(mut self, deferral: DeferralStrategy) -> Self {
        self.deferral = deferral;
        self
    }

    /// Set the log label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label for log lines, empty when unset.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_detect_without_runtime_fails() {
        assert!(matches!(DeferralStrategy::detect(), Err(QueueError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_detect_on_current_thread_runtime_yields() {
        let strategy = DeferralStrategy::detect().unwrap();
        assert_eq!(strategy.name(), "yield");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_detect_on_multi_thread_runtime_spawns() {
        let strategy = DeferralStrategy::detect().unwrap();
        assert_eq!(strategy.name(), "spawn");
    }

    #[tokio::test]
    async fn test_defer_never_runs_inline() {
        for strategy in [
            DeferralStrategy::detect().unwrap(),
            DeferralStrategy::Spawn(Handle::current()),
            DeferralStrategy::timer(Duration::from_millis(1)).unwrap(),
        ] {
            let ran = Arc::new(AtomicBool::new(false));
            let (tx, rx) = tokio::sync::oneshot::channel();
            let flag = ran.clone();
            strategy.defer(async move {
                flag.store(true, Ordering::SeqCst);
                let _ = tx.send(());
            });

            assert!(!ran.load(Ordering::SeqCst), "{} ran inline", strategy.name());
            rx.await.unwrap();
            assert!(ran.load(Ordering::SeqCst));
        }
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = QueueConfig::detect()
            .unwrap()
            .with_label("ingest")
            .with_deferral(DeferralStrategy::Spawn(Handle::current()));

        assert_eq!(config.label(), "ingest");
        assert_eq!(config.deferral.name(), "spawn");
    }
}
