use crate::action::{Action, Resources};
use crate::error::{GraphError, Result};
use crate::events::ProgressSink;
use crate::graph::{resolve, ExecutionPlan, Executor};
use crate::registry::{Overwrite, Registry, Task};
use crate::report::{ReportLedger, RunReport};
use crate::types::{RunId, RunOptions, TaskName};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Owns a registry and runs requested tasks against it.
///
/// The registry is frozen while any run is active: registrations made from
/// inside a running action fail with `InvalidState`.
pub struct Runner {
    registry: RwLock<Registry>,
    active_runs: AtomicUsize,
    sink: Option<Arc<dyn ProgressSink>>,
    resources: Resources,
}

struct ActiveRun<'a>(&'a AtomicUsize);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Runner {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: RwLock::new(registry),
            active_runs: AtomicUsize::new(0),
            sink: None,
            resources: Resources::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn register<I, S>(&self, name: &str, dependencies: I, action: Action) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let task = Task::new(name, dependencies, action)?;
        self.register_task(task, Overwrite::Deny)
    }

    pub fn register_task(&self, task: Task, overwrite: Overwrite) -> Result<()> {
        let mut registry = self.write();
        // Checked under the write lock; runs enter under the read lock
        if self.active_runs.load(Ordering::SeqCst) > 0 {
            return Err(GraphError::InvalidState(format!(
                "cannot register '{}' while a run is in progress",
                task.name
            )));
        }
        registry.register_task(task, overwrite)
    }

    /// Registered task names in registration order
    pub fn list(&self) -> Vec<TaskName> {
        self.read().list().cloned().collect()
    }

    /// Read access to the registry, e.g. to print descriptions
    pub fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.read()
    }

    pub fn is_running(&self) -> bool {
        self.active_runs.load(Ordering::SeqCst) > 0
    }

    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> Result<ExecutionPlan> {
        resolve(&self.read(), requested)
    }

    /// Resolve and execute the requested tasks.
    ///
    /// Resolution errors are returned before any task starts; once execution
    /// begins the outcome is always a report.
    pub async fn run<S: AsRef<str>>(&self, requested: &[S], options: RunOptions) -> Result<RunReport> {
        self.run_inner(requested, options, self.sink.clone()).await
    }

    /// Like [`Runner::run`], reporting transitions of this run to `sink`
    /// instead of the runner's own sink
    pub async fn run_with_sink<S: AsRef<str>>(
        &self,
        requested: &[S],
        options: RunOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunReport> {
        self.run_inner(requested, options, Some(sink)).await
    }

    async fn run_inner<S: AsRef<str>>(
        &self,
        requested: &[S],
        options: RunOptions,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<RunReport> {
        options.validate()?;
        let (plan, _active) = {
            let registry = self.read();
            self.active_runs.fetch_add(1, Ordering::SeqCst);
            let active = ActiveRun(&self.active_runs);
            (resolve(&registry, requested)?, active)
        };

        let ledger = ReportLedger::new(RunId::new(), &plan);
        self.executor(options, sink)
            .execute_with_ledger(&plan, ledger)
            .await
    }

    /// Like [`Runner::run`] but records into a caller supplied ledger, which
    /// must be built from `plan`.
    pub async fn run_plan(
        &self,
        plan: &ExecutionPlan,
        ledger: ReportLedger,
        options: RunOptions,
    ) -> Result<RunReport> {
        let _active = {
            let _registry = self.read();
            self.active_runs.fetch_add(1, Ordering::SeqCst);
            ActiveRun(&self.active_runs)
        };
        self.executor(options, self.sink.clone())
            .execute_with_ledger(plan, ledger)
            .await
    }

    fn executor(&self, options: RunOptions, sink: Option<Arc<dyn ProgressSink>>) -> Executor {
        let executor = Executor::new(options).with_resources(self.resources.clone());
        match sink {
            Some(sink) => executor.with_sink(sink),
            None => executor,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("tasks", &self.read().len())
            .field("active_runs", &self.active_runs.load(Ordering::SeqCst))
            .finish()
    }
}
