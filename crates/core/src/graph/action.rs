//! Action adapter.
//!
//! Leaf actions complete in different ways: some return a value right away,
//! some call a completion handle later, some produce a stream of effects
//! that must all settle. [`adapt`] turns every style into a single
//! `Result<(), TaskError>` so the executor never needs to know which one
//! it is running.

use crate::error::TaskError;
use crate::types::{RunId, TaskName};
use futures::future::FutureExt;
use futures::stream::{BoxStream, StreamExt};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Typed bag of external collaborators handed to every action.
///
/// The engine never looks inside; leaves fetch what they need by type.
#[derive(Clone, Default)]
pub struct Resources {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a collaborator, replacing any previous value of the same type
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        Arc::make_mut(&mut self.entries).insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Like [`Resources::get`] but fails with a descriptive error
    pub fn require<T: Send + Sync + 'static>(&self) -> anyhow::Result<Arc<T>> {
        self.get::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "resource {} is not available to this task",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Everything an action gets to see about the run it belongs to
#[derive(Debug, Clone)]
pub struct TaskContext {
    run_id: RunId,
    task: TaskName,
    resources: Resources,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub fn new(
        run_id: RunId,
        task: TaskName,
        resources: Resources,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            task,
            resources,
            cancellation,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn task(&self) -> &TaskName {
        &self.task
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Cancelled when the run aborts. Observing it is optional; the
    /// executor never interrupts a running action.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Intermediate effect produced by a streamed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect {
    pub label: String,
}

impl Effect {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

/// What a callback-style action hands back when it is invoked
pub enum Completion {
    /// The action will invoke its [`Done`] handle later.
    Pending,
    /// The action finished synchronously and will not signal.
    Ready(anyhow::Result<()>),
}

struct DoneInner {
    task: TaskName,
    sender: Mutex<Option<oneshot::Sender<Option<anyhow::Error>>>>,
    calls: Arc<AtomicUsize>,
    /// Closed once the last clone is dropped
    _alive: mpsc::Sender<()>,
}

/// Completion handle for callback-style actions.
///
/// Handles may be cloned and moved into spawned work. Exactly one call to
/// [`Done::finish`] (or its shorthands) is expected across all clones;
/// dropping every clone without calling it is a contract violation. The
/// task settles only once every clone has been dropped, so a late second
/// call is still caught.
#[derive(Clone)]
pub struct Done {
    inner: Arc<DoneInner>,
}

impl Done {
    fn new(
        task: TaskName,
        sender: oneshot::Sender<Option<anyhow::Error>>,
        calls: Arc<AtomicUsize>,
        alive: mpsc::Sender<()>,
    ) -> Self {
        Self {
            inner: Arc::new(DoneInner {
                task,
                sender: Mutex::new(Some(sender)),
                calls,
                _alive: alive,
            }),
        }
    }

    pub fn succeed(&self) {
        self.finish(None);
    }

    pub fn fail(&self, error: impl Into<anyhow::Error>) {
        self.finish(Some(error.into()));
    }

    pub fn finish(&self, error: Option<anyhow::Error>) {
        let previous = self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let sender = match self.inner.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(sender) => {
                // The receiver is gone when the task already settled
                let _ = sender.send(error);
            }
            None => {
                tracing::warn!(
                    "Completion signal for task '{}' invoked {} times",
                    self.inner.task,
                    previous + 1
                );
            }
        }
    }
}

impl std::fmt::Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done")
            .field("task", &self.inner.task)
            .field("calls", &self.inner.calls.load(Ordering::SeqCst))
            .finish()
    }
}

/// Asynchronous action that settles with a deferred result.
#[async_trait::async_trait]
pub trait AsyncAction: Send + Sync {
    async fn invoke(&self, ctx: TaskContext) -> anyhow::Result<()>;
}

struct FnAction<F>(F);

#[async_trait::async_trait]
impl<F, Fut> AsyncAction for FnAction<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn invoke(&self, ctx: TaskContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

pub type SyncFn = dyn Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync;
pub type CallbackFn = dyn Fn(TaskContext, Done) -> Completion + Send + Sync;
pub type StreamFn =
    dyn Fn(TaskContext) -> BoxStream<'static, anyhow::Result<Effect>> + Send + Sync;

/// The work a task performs
#[derive(Clone, Default)]
pub enum Action {
    /// Grouping task with nothing to do besides its dependencies
    #[default]
    Noop,
    /// Returns its result immediately; runs on the blocking pool
    Sync(Arc<SyncFn>),
    /// Signals completion through a [`Done`] handle
    Callback(Arc<CallbackFn>),
    /// Resolves a future
    Deferred(Arc<dyn AsyncAction>),
    /// Emits effects that must all settle
    Stream(Arc<StreamFn>),
}

impl Action {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(TaskContext, Done) -> Completion + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Deferred(Arc::new(FnAction(f)))
    }

    pub fn from_async<A>(action: A) -> Self
    where
        A: AsyncAction + 'static,
    {
        Self::Deferred(Arc::new(action))
    }

    pub fn stream<F>(f: F) -> Self
    where
        F: Fn(TaskContext) -> BoxStream<'static, anyhow::Result<Effect>> + Send + Sync + 'static,
    {
        Self::Stream(Arc::new(f))
    }

    pub fn style(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Sync(_) => "sync",
            Self::Callback(_) => "callback",
            Self::Deferred(_) => "deferred",
            Self::Stream(_) => "stream",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }

    /// Run the action once and normalise its outcome.
    async fn invoke(&self, ctx: TaskContext) -> Result<(), TaskError> {
        match self {
            Self::Noop => Ok(()),
            Self::Sync(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(&ctx))
                    .await
                    .map_err(|e| {
                        if e.is_panic() {
                            TaskError::Panicked(panic_message(e.into_panic().as_ref()))
                        } else {
                            TaskError::Panicked("blocking action was cancelled".to_string())
                        }
                    })?
                    .map_err(TaskError::action)
            }
            Self::Callback(f) => invoke_callback(f.as_ref(), ctx).await,
            Self::Deferred(action) => action.invoke(ctx).await.map_err(TaskError::action),
            Self::Stream(f) => {
                let task = ctx.task().clone();
                let mut effects = f(ctx);
                let mut settled = 0usize;
                while let Some(item) = effects.next().await {
                    match item {
                        Ok(effect) => {
                            settled += 1;
                            tracing::debug!("Task '{}' effect settled: {}", task, effect.label);
                        }
                        Err(e) => return Err(TaskError::action(e)),
                    }
                }
                tracing::debug!("Task '{}' stream finished after {} effects", task, settled);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Action::{}", self.style())
    }
}

async fn invoke_callback(f: &CallbackFn, ctx: TaskContext) -> Result<(), TaskError> {
    let (sender, receiver) = oneshot::channel();
    let (alive, mut released) = mpsc::channel::<()>(1);
    let calls = Arc::new(AtomicUsize::new(0));
    let done = Done::new(ctx.task().clone(), sender, Arc::clone(&calls), alive);

    // Signals allowed across all clones for the chosen completion style
    let (allowed, outcome) = match f(ctx, done) {
        Completion::Ready(result) => (0, result.map_err(TaskError::action)),
        Completion::Pending => match receiver.await {
            Ok(None) => (1, Ok(())),
            Ok(Some(e)) => (1, Err(TaskError::action(e))),
            Err(_) => {
                return Err(TaskError::Malformed(
                    "completion signal was dropped without being invoked".to_string(),
                ))
            }
        },
    };

    // Clones moved into spawned work may still signal; the action is judged
    // once all of them are gone. Bounded by the task timeout.
    while released.recv().await.is_some() {}

    let count = calls.load(Ordering::SeqCst);
    if count > allowed {
        return Err(TaskError::Malformed(if allowed == 0 {
            "action both returned a result and invoked its completion signal".to_string()
        } else {
            format!("completion signal invoked {} times", count)
        }));
    }
    outcome
}

/// Invoke `action` with the uniform contract: exactly one of success or a
/// [`TaskError`], bounded by `timeout` when one is given. Panics inside the
/// action are caught and reported as failures of the task.
pub async fn adapt(
    action: &Action,
    ctx: TaskContext,
    timeout: Option<Duration>,
) -> Result<(), TaskError> {
    let guarded = AssertUnwindSafe(action.invoke(ctx)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(TaskError::Timeout(limit)),
        },
        None => guarded.await,
    };

    outcome.unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn ctx() -> TaskContext {
        TaskContext::new(
            RunId::new(),
            TaskName::parse("leaf").unwrap(),
            Resources::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_noop_succeeds() {
        assert!(adapt(&Action::Noop, ctx(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_sync_action_result() {
        let ok = Action::sync(|_| Ok(()));
        assert!(adapt(&ok, ctx(), None).await.is_ok());

        let failing = Action::sync(|_| Err(anyhow::anyhow!("uglify exited with 2")));
        let err = adapt(&failing, ctx(), None).await.unwrap_err();
        assert_eq!(err.to_string(), "uglify exited with 2");
    }

    #[tokio::test]
    async fn test_sync_action_panic_is_caught() {
        let action = Action::sync(|_| panic!("boom"));
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert!(matches!(err, TaskError::Panicked(ref msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_callback_signal_later() {
        let action = Action::callback(|_, done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.succeed();
            });
            Completion::Pending
        });
        assert!(adapt(&action, ctx(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_callback_signal_with_error() {
        let action = Action::callback(|_, done| {
            done.fail(anyhow::anyhow!("download failed"));
            Completion::Pending
        });
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert!(matches!(err, TaskError::Action(_)));
        assert_eq!(err.to_string(), "download failed");
    }

    #[tokio::test]
    async fn test_callback_ready_without_signal() {
        let action = Action::callback(|_, _done| Completion::Ready(Ok(())));
        assert!(adapt(&action, ctx(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_callback_signalled_twice_is_malformed() {
        let action = Action::callback(|_, done| {
            done.succeed();
            done.succeed();
            Completion::Pending
        });
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[tokio::test]
    async fn test_callback_returned_and_signalled_is_malformed() {
        let action = Action::callback(|_, done| {
            done.succeed();
            Completion::Ready(Ok(()))
        });
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_callback_signalled_again_after_await_is_malformed() {
        let action = Action::callback(|_, done| {
            tokio::spawn(async move {
                done.succeed();
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.succeed();
            });
            Completion::Pending
        });
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert!(matches!(err, TaskError::Malformed(ref msg) if msg.contains("2 times")), "{err}");
    }

    #[tokio::test]
    async fn test_callback_ready_then_signalled_later_is_malformed() {
        let action = Action::callback(|_, done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.succeed();
            });
            Completion::Ready(Ok(()))
        });
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[tokio::test]
    async fn test_callback_clone_dropped_after_signal() {
        let action = Action::callback(|_, done| {
            let spare = done.clone();
            done.succeed();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(spare);
            });
            Completion::Pending
        });
        assert!(adapt(&action, ctx(), None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_clone_held_forever_times_out() {
        let action = Action::callback(|_, done| {
            let spare = done.clone();
            done.succeed();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(spare);
            });
            Completion::Pending
        });
        let err = adapt(&action, ctx(), Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_callback_dropped_without_signal_is_malformed() {
        let action = Action::callback(|_, done| {
            drop(done);
            Completion::Pending
        });
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[tokio::test]
    async fn test_deferred_closure_and_trait_object() {
        let closure = Action::deferred(|ctx: TaskContext| async move {
            anyhow::ensure!(ctx.task().as_str() == "leaf", "wrong task");
            Ok(())
        });
        assert!(adapt(&closure, ctx(), None).await.is_ok());

        struct Flag(Arc<AtomicBool>);

        #[async_trait::async_trait]
        impl AsyncAction for Flag {
            async fn invoke(&self, _ctx: TaskContext) -> anyhow::Result<()> {
                self.0.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let flag = Arc::new(AtomicBool::new(false));
        let action = Action::from_async(Flag(Arc::clone(&flag)));
        assert!(adapt(&action, ctx(), None).await.is_ok());
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stream_settles_every_effect() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let action = Action::stream(move |_| {
            let counter = Arc::clone(&counter);
            futures::stream::iter(0..3)
                .then(move |i| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Effect::new(format!("file-{i}")))
                    }
                })
                .boxed()
        });

        assert!(adapt(&action, ctx(), None).await.is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stream_error_fails_task() {
        let action = Action::stream(|_| {
            futures::stream::iter(vec![
                Ok(Effect::new("a")),
                Err(anyhow::anyhow!("404 for b")),
                Ok(Effect::new("c")),
            ])
            .boxed()
        });
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert_eq!(err.to_string(), "404 for b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let action = Action::deferred(|_ctx: TaskContext| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let err = adapt(&action, ctx(), Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_async_panic_is_caught() {
        let action = Action::deferred(|ctx: TaskContext| async move {
            assert!(ctx.is_cancelled(), "bad template");
            Ok(())
        });
        let err = adapt(&action, ctx(), None).await.unwrap_err();
        assert!(matches!(err, TaskError::Panicked(ref msg) if msg == "bad template"));
    }

    #[test]
    fn test_resources_by_type() {
        #[derive(Debug, PartialEq)]
        struct Root(&'static str);

        let resources = Resources::new().with(Root("/tmp/dist")).with(42u32);
        assert_eq!(resources.len(), 2);
        assert_eq!(*resources.get::<Root>().unwrap(), Root("/tmp/dist"));
        assert_eq!(*resources.get::<u32>().unwrap(), 42);
        assert!(resources.get::<String>().is_none());
        assert!(resources.require::<String>().is_err());
    }
}
