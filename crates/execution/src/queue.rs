//! The step queue - a single-flight pipeline of deferred steps.
//!
//! ```text
//! enqueue → defer → run step → complete(values) → bind → next | on_complete
//! ```
//!
//! A `StepQueue` is a cheap handle; clones share the same pending list,
//! context and handlers. At most one step is in flight at any time, and a
//! step counts as in flight until its completion callback first fires.

use crate::binder::{BindOutcome, BindTarget, ResultBinder};
use crate::error::{ErrorChannel, QueueError};
use crate::scheduler::QueueConfig;
use serde_json::Value;
use serialq_core::{DirectiveError, ExecutionContext, KeyDirective, QueueId, StepValue};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type StepFn = Box<dyn FnOnce(Completion, Arc<ExecutionContext>, StepQueue) -> anyhow::Result<()> + Send>;

/// Fires when the queue drains, with the final context and the queue itself.
pub type CompletionHandler =
    Box<dyn FnOnce(Arc<ExecutionContext>, StepQueue) -> anyhow::Result<()> + Send>;

struct StepRecord {
    seq: u64,
    directives: Vec<KeyDirective>,
    run: StepFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing scheduled or running
    Idle,
    /// A dispatch is deferred but has not started
    Scheduled,
    /// The given step has been invoked and has not completed
    Running(u64),
}

struct QueueState {
    context: Arc<ExecutionContext>,
    pending: VecDeque<StepRecord>,
    phase: Phase,
    next_seq: u64,
    errors: ErrorChannel,
    on_complete: Option<CompletionHandler>,
}

struct Inner {
    id: QueueId,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

/// Handle to a sequential step queue.
#[derive(Clone)]
pub struct StepQueue {
    inner: Arc<Inner>,
}

impl StepQueue {
    /// Create a queue with an empty context.
    pub fn new(config: QueueConfig) -> Self {
        Self::with_context(config, ExecutionContext::new())
    }

    /// Create a queue seeded with `context`.
    pub fn with_context(config: QueueConfig, context: ExecutionContext) -> Self {
        let id = QueueId::new();
        debug!(queue = %id, label = config.label(), deferral = config.deferral.name(), "queue created");
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                state: Mutex::new(QueueState {
                    context: Arc::new(context),
                    pending: VecDeque::new(),
                    phase: Phase::Idle,
                    next_seq: 0,
                    errors: ErrorChannel::default(),
                    on_complete: None,
                }),
            }),
        }
    }

    /// This queue's id.
    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    /// The configuration this queue was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Snapshot of the current context.
    pub fn context(&self) -> Arc<ExecutionContext> {
        self.state().context.clone()
    }

    /// Number of steps waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Whether nothing is queued, scheduled or running.
    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.phase == Phase::Idle && state.pending.is_empty()
    }

    /// Queue a step that receives an explicit completion callback.
    ///
    /// The step is never invoked on the caller's stack. It may call
    /// `complete` right away or hand the callback to other work; the queue
    /// stays busy until the first call.
    pub fn callback_step<D, F>(&self, directives: D, step: F) -> &Self
    where
        D: IntoIterator<Item = KeyDirective>,
        F: FnOnce(Completion, Arc<ExecutionContext>, StepQueue) -> anyhow::Result<()> + Send + 'static,
    {
        let directives: Vec<KeyDirective> = directives.into_iter().collect();
        let (seq, schedule) = {
            let mut state = self.state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push_back(StepRecord {
                seq,
                directives,
                run: Box::new(step),
            });
            let schedule = state.phase == Phase::Idle;
            if schedule {
                state.phase = Phase::Scheduled;
            }
            (seq, schedule)
        };

        debug!(queue = %self.id(), step = seq, "step queued");
        if schedule {
            self.schedule();
        }
        self
    }

    /// Queue a step whose return value is its sole output.
    ///
    /// Returning a pending [`StepValue`] makes the binder await it.
    pub fn step<D, F, V>(&self, directives: D, step: F) -> &Self
    where
        D: IntoIterator<Item = KeyDirective>,
        F: FnOnce(Arc<ExecutionContext>, StepQueue) -> anyhow::Result<V> + Send + 'static,
        V: Into<StepValue>,
    {
        self.callback_step(directives, move |complete, context, queue| {
            let value: StepValue = step(context, queue)?.into();
            complete.complete([value]);
            Ok(())
        })
    }

    /// Queue a step whose future's output is its sole output.
    pub fn async_step<D, F, Fut>(&self, directives: D, step: F) -> &Self
    where
        D: IntoIterator<Item = KeyDirective>,
        F: FnOnce(Arc<ExecutionContext>, StepQueue) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.step(directives, move |context, queue| {
            Ok(StepValue::pending(step(context, queue)))
        })
    }

    /// Register the error handler, replacing any previous one.
    pub fn on_error<H>(&self, handler: H) -> &Self
    where
        H: Fn(QueueError) + Send + Sync + 'static,
    {
        self.state().errors.register(Arc::new(handler));
        self
    }

    /// Register the completion handler, replacing any previous one.
    ///
    /// The handler is one-shot: it is consumed the first time the queue
    /// drains or is finished.
    pub fn on_complete<H>(&self, handler: H) -> &Self
    where
        H: FnOnce(Arc<ExecutionContext>, StepQueue) -> anyhow::Result<()> + Send + 'static,
    {
        self.state().on_complete = Some(Box::new(handler));
        self
    }

    /// Drop every step not yet dispatched and fire the completion handler.
    ///
    /// A step already in flight still binds its results when it completes.
    pub fn finish(&self) {
        let (dropped, handler, context) = {
            let mut state = self.state();
            let dropped = std::mem::take(&mut state.pending);
            (dropped, state.on_complete.take(), state.context.clone())
        };

        info!(queue = %self.id(), dropped = dropped.len(), "queue finished");
        drop(dropped);

        if let Some(handler) = handler {
            self.fire_complete(handler, context);
        }
    }

    /// Report an error on this queue's error channel.
    ///
    /// Without a registered handler the error is fatal.
    pub fn raise(&self, error: QueueError) {
        let channel = self.state().errors.clone();
        debug!(queue = %self.id(), error = %error, "raising error");
        channel.raise(self.id(), error);
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.inner.state)
    }

    fn schedule(&self) {
        let queue = self.clone();
        self.inner.config.deferral.defer(async move { queue.dispatch().await });
    }

    async fn dispatch(self) {
        let next = {
            let mut state = self.state();
            match state.pending.pop_front() {
                Some(record) => {
                    state.phase = Phase::Running(record.seq);
                    Some((record, state.context.clone()))
                }
                None => {
                    state.phase = Phase::Idle;
                    None
                }
            }
        };
        let Some((record, context)) = next else {
            debug!(queue = %self.id(), "nothing left to dispatch");
            return;
        };

        let StepRecord { seq, directives, run } = record;
        let (tx, rx) = oneshot::channel();
        let completion = Completion::new(self.id(), seq, tx);

        debug!(queue = %self.id(), step = seq, "dispatching step");
        let queue = self.clone();
        match panic::catch_unwind(AssertUnwindSafe(move || run(completion, context, queue))) {
            Ok(Ok(())) => {}
            Ok(Err(source)) => self.raise(QueueError::StepFault { step: seq, source }),
            Err(payload) => self.raise(QueueError::StepFault {
                step: seq,
                source: anyhow::anyhow!("step panicked: {}", panic_message(payload.as_ref())),
            }),
        }

        let values = match rx.await {
            Ok(values) => values,
            Err(_) => {
                warn!(queue = %self.id(), step = seq, "step dropped its completion without calling it; queue stalled");
                return;
            }
        };

        debug!(queue = %self.id(), step = seq, values = values.len(), "step completed");
        if let BindOutcome::Abandoned(index) = ResultBinder::new(&self, seq).bind(directives, values).await {
            debug!(queue = %self.id(), step = seq, index, "binding abandoned");
        }
        self.advance();
    }

    fn advance(&self) {
        let drained = {
            let mut state = self.state();
            if state.pending.is_empty() {
                state.phase = Phase::Idle;
                Some((state.on_complete.take(), state.context.clone()))
            } else {
                state.phase = Phase::Scheduled;
                None
            }
        };

        match drained {
            None => self.schedule(),
            Some((handler, context)) => {
                info!(queue = %self.id(), label = self.inner.config.label(), "queue drained");
                if let Some(handler) = handler {
                    self.fire_complete(handler, context);
                }
            }
        }
    }

    fn fire_complete(&self, handler: CompletionHandler, context: Arc<ExecutionContext>) {
        let queue = self.clone();
        match panic::catch_unwind(AssertUnwindSafe(move || handler(context, queue))) {
            Ok(Ok(())) => {}
            Ok(Err(source)) => self.raise(QueueError::CompletionHandler(source)),
            Err(payload) => self.raise(QueueError::CompletionHandler(anyhow::anyhow!(
                "completion handler panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl BindTarget for StepQueue {
    fn apply(&self, directive: &KeyDirective, value: Value) -> Result<(), DirectiveError> {
        let mut state = self.state();
        Arc::make_mut(&mut state.context).apply(directive, value)
    }

    fn raise(&self, error: QueueError) {
        StepQueue::raise(self, error);
    }
}

impl std::fmt::Debug for StepQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("StepQueue")
            .field("id", &self.inner.id)
            .field("label", &self.inner.config.label)
            .field("phase", &state.phase)
            .field("pending", &state.pending.len())
            .field("errors", &state.errors)
            .finish()
    }
}

/// Completion callback handed to a step.
///
/// Clones share one underlying signal; only the first `complete` call across
/// all of them has any effect.
#[derive(Clone)]
pub struct Completion {
    queue: QueueId,
    step: u64,
    signal: Arc<Mutex<Option<oneshot::Sender<Vec<StepValue>>>>>,
}

impl Completion {
    fn new(queue: QueueId, step: u64, sender: oneshot::Sender<Vec<StepValue>>) -> Self {
        Self {
            queue,
            step,
            signal: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Sequence number of the step this callback belongs to.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Complete the step with positional result values.
    ///
    /// Returns `false` if the step had already been completed.
    pub fn complete<I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = StepValue>,
    {
        let Some(sender) = lock(&self.signal).take() else {
            warn!(queue = %self.queue, step = self.step, "ignoring repeated completion");
            return false;
        };
        // The queue only stops listening if its task died.
        let _ = sender.send(values.into_iter().collect());
        true
    }

    /// Complete the step with no result values.
    pub fn done(&self) -> bool {
        self.complete(std::iter::empty())
    }

    /// Whether `complete` has already been called.
    pub fn is_completed(&self) -> bool {
        lock(&self.signal).is_none()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("queue", &self.queue)
            .field("step", &self.step)
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Lock a mutex, recovering the data if a panicking step poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> StepQueue {
        StepQueue::new(QueueConfig::detect().unwrap())
    }

    #[tokio::test]
    async fn test_new_queue_is_idle() {
        let q = queue();
        assert!(q.is_idle());
        assert_eq!(q.pending(), 0);
        assert!(q.context().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_defers_dispatch() {
        let q = queue();
        q.step([KeyDirective::plain("a")], |_, _| Ok(json!(1)));

        assert!(!q.is_idle());
        assert_eq!(q.pending(), 1);
        assert!(q.context().get("a").is_none());
    }

    #[tokio::test]
    async fn test_completion_reports_repeats() {
        let (tx, _rx) = oneshot::channel();
        let completion = Completion::new(QueueId::new(), 0, tx);
        let copy = completion.clone();

        assert!(!completion.is_completed());
        assert!(completion.done());
        assert!(copy.is_completed());
        assert!(!copy.complete([StepValue::null()]));
    }

    #[tokio::test]
    async fn test_finish_on_idle_queue_fires_handler_once() {
        let q = queue();
        let fired = Arc::new(Mutex::new(0));
        let counter = fired.clone();
        q.on_complete(move |_, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        q.finish();
        q.finish();
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("went {}", "wrong")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "went wrong");
    }
}
