use super::action::{adapt, Resources, TaskContext};
use super::dag::ExecutionPlan;
use crate::error::{GraphError, Result, TaskError};
use crate::events::ProgressSink;
use crate::report::{ReportLedger, RunReport};
use crate::types::{RunId, RunOptions, TaskName, TaskState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

type Settled = (
    TaskName,
    std::result::Result<(), TaskError>,
    OwnedSemaphorePermit,
);

/// Executes an [`ExecutionPlan`] on a bounded pool of tokio tasks.
///
/// The executor is agnostic to what tasks do: every action goes through
/// the action adapter and only the normalised outcome is inspected.
pub struct Executor {
    options: RunOptions,
    sink: Option<Arc<dyn ProgressSink>>,
    resources: Resources,
}

impl Executor {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            sink: None,
            resources: Resources::default(),
        }
    }

    /// Receive every state transition of every run
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Collaborators made available to actions through their context
    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Execute the plan and return the final report
    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<RunReport> {
        let ledger = ReportLedger::new(RunId::new(), plan);
        self.execute_with_ledger(plan, ledger).await
    }

    /// Execute the plan, recording into a caller supplied ledger so progress
    /// can be read through [`ReportLedger::snapshot`] while the run is live.
    pub async fn execute_with_ledger(
        &self,
        plan: &ExecutionPlan,
        ledger: ReportLedger,
    ) -> Result<RunReport> {
        self.options.validate()?;
        if !ledger.matches(plan) {
            return Err(GraphError::InvalidState(
                "report ledger was created for a different plan".to_string(),
            ));
        }
        if !ledger.is_fresh() {
            return Err(GraphError::InvalidState(format!(
                "report ledger of run {} has already been used",
                ledger.run_id()
            )));
        }

        let run_id = ledger.run_id();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.drive(plan, &ledger)
            .instrument(span)
            .await;

        let report = ledger.finish();
        let summary = report.summary();
        tracing::info!(
            "Run {} finished: {} succeeded, {} failed, {} skipped",
            run_id,
            summary.succeeded,
            summary.failed,
            summary.skipped
        );
        Ok(report)
    }

    async fn drive(&self, plan: &ExecutionPlan, ledger: &ReportLedger) {
        let run_id = ledger.run_id();
        let order: Vec<&TaskName> = plan.order().collect();
        let mut states: HashMap<TaskName, TaskState> = order
            .iter()
            .map(|name| ((*name).clone(), TaskState::Pending))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency_limit));
        let cancellation = CancellationToken::new();
        let mut in_flight: JoinSet<Settled> = JoinSet::new();
        let mut first_failure: Option<TaskName> = None;

        tracing::info!(
            "Executing {} tasks in {} waves (concurrency {}, fail_fast {})",
            plan.len(),
            plan.waves().len(),
            self.options.concurrency_limit,
            self.options.fail_fast
        );

        loop {
            // Plan order is topological, so one pass settles transitive skips
            for &name in &order {
                if states[name] != TaskState::Pending {
                    continue;
                }
                let blocked = plan
                    .dependencies_of(name.as_str())
                    .iter()
                    .find(|dep| matches!(states[*dep], TaskState::Failed | TaskState::Skipped));
                if let Some(dep) = blocked {
                    let reason = format!("dependency '{}' {}", dep, states[dep]);
                    self.record(ledger, &mut states, name, TaskState::Skipped, None, Some(reason));
                }
            }

            if self.options.fail_fast {
                if let Some(failed) = &first_failure {
                    let mut cancelled = 0usize;
                    for &name in &order {
                        if states[name] == TaskState::Pending {
                            let reason = format!("cancelled after failure of '{}'", failed);
                            self.record(ledger, &mut states, name, TaskState::Skipped, None, Some(reason));
                            cancelled += 1;
                        }
                    }
                    if cancelled > 0 {
                        ledger.mark_aborted();
                    }
                }
            }

            let barrier = if self.options.wave_barrier {
                order
                    .iter()
                    .find(|name| !states[**name].is_terminal())
                    .and_then(|name| plan.wave_of(name.as_str()))
                    .unwrap_or(usize::MAX)
            } else {
                usize::MAX
            };

            for &name in &order {
                if states[name] != TaskState::Pending {
                    continue;
                }
                if plan.wave_of(name.as_str()).unwrap_or(0) > barrier {
                    break;
                }
                let ready = plan
                    .dependencies_of(name.as_str())
                    .iter()
                    .all(|dep| states[dep] == TaskState::Succeeded);
                if !ready {
                    continue;
                }
                let Some(task) = plan.task(name.as_str()).cloned() else {
                    continue;
                };
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };

                if !self.record(ledger, &mut states, name, TaskState::Running, None, None) {
                    // Someone else moved the entry; never dispatch it from here
                    states.insert(name.clone(), TaskState::Skipped);
                    continue;
                }

                let ctx = TaskContext::new(
                    run_id,
                    name.clone(),
                    self.resources.clone(),
                    cancellation.clone(),
                );
                let timeout = task.timeout.or(self.options.task_timeout);
                let span = tracing::debug_span!("task", task = %name, style = task.action.style());

                in_flight.spawn(
                    async move {
                        let outcome = adapt(&task.action, ctx, timeout).await;
                        (task.name.clone(), outcome, permit)
                    }
                    .instrument(span),
                );
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            // The permit is released only after the outcome is recorded, so the
            // ledger never shows more Running tasks than the limit allows
            match joined {
                Ok((name, Ok(()), _permit)) => {
                    self.record(ledger, &mut states, &name, TaskState::Succeeded, None, None);
                }
                Ok((name, Err(error), _permit)) => {
                    tracing::debug!("Task '{}' failed: {}", name, error);
                    self.record(ledger, &mut states, &name, TaskState::Failed, Some(error), None);
                    if first_failure.is_none() {
                        first_failure = Some(name);
                        if self.options.fail_fast {
                            cancellation.cancel();
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Task worker terminated abnormally: {}", e);
                }
            }
        }

        // Only reachable with entries left over when a worker was torn down
        for &name in &order {
            match states[name] {
                TaskState::Running => {
                    let error = TaskError::Panicked("worker terminated without reporting".into());
                    self.record(ledger, &mut states, name, TaskState::Failed, Some(error), None);
                }
                TaskState::Pending => {
                    let reason = "never became ready".to_string();
                    self.record(ledger, &mut states, name, TaskState::Skipped, None, Some(reason));
                }
                _ => {}
            }
        }
    }

    fn record(
        &self,
        ledger: &ReportLedger,
        states: &mut HashMap<TaskName, TaskState>,
        name: &TaskName,
        to: TaskState,
        error: Option<TaskError>,
        reason: Option<String>,
    ) -> bool {
        match ledger.transition(name, to, error, reason) {
            Ok(transition) => {
                states.insert(name.clone(), to);
                if let Some(sink) = &self.sink {
                    sink.on_transition(&transition);
                }
                true
            }
            Err(e) => {
                tracing::error!("Rejected transition of '{}' to {}: {}", name, to, e);
                false
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(RunOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, Completion};
    use crate::events::Transition;
    use crate::graph::resolve;
    use crate::registry::{Overwrite, Registry, Task};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Counts invocations and tracks peak parallelism
    #[derive(Default)]
    struct Tracker {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Tracker {
        fn action(self: &Arc<Self>, delay_ms: u64, fail: bool) -> Action {
            let tracker = Arc::clone(self);
            Action::deferred(move |_ctx| {
                let tracker = Arc::clone(&tracker);
                async move {
                    tracker.calls.fetch_add(1, Ordering::SeqCst);
                    let now = tracker.active.fetch_add(1, Ordering::SeqCst) + 1;
                    tracker.peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    tracker.active.fetch_sub(1, Ordering::SeqCst);
                    if fail {
                        anyhow::bail!("simulated failure");
                    }
                    Ok(())
                }
            })
        }
    }

    fn options() -> RunOptions {
        RunOptions::default().with_concurrency(4)
    }

    async fn run(registry: &Registry, targets: &[&str], options: RunOptions) -> RunReport {
        let plan = resolve(registry, targets).unwrap();
        Executor::new(options).execute(&plan).await.unwrap()
    }

    #[tokio::test]
    async fn test_fan_in_all_succeed() {
        let tracker = Arc::new(Tracker::default());
        let mut registry = Registry::new();
        registry.register("A", Vec::<String>::new(), tracker.action(5, false)).unwrap();
        registry.register("B", Vec::<String>::new(), tracker.action(5, false)).unwrap();
        registry.register("C", ["A", "B"], tracker.action(1, false)).unwrap();

        let report = run(&registry, &["C"], options()).await;

        assert!(report.is_success());
        assert_eq!(report.summary().succeeded, 3);
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 3);
        assert!(report.duration("C").is_some());
        assert!(report.is_final());
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents() {
        let tracker = Arc::new(Tracker::default());
        let dependents = Arc::new(Tracker::default());
        let mut registry = Registry::new();
        registry.register("A", Vec::<String>::new(), tracker.action(1, true)).unwrap();
        registry.register("B", ["A"], dependents.action(1, false)).unwrap();
        registry.register("C", ["A"], dependents.action(1, false)).unwrap();
        registry.register("D", ["B"], dependents.action(1, false)).unwrap();

        let report = run(&registry, &["C", "D"], options()).await;

        assert_eq!(report.status("A"), Some(TaskState::Failed));
        assert_eq!(report.status("B"), Some(TaskState::Skipped));
        assert_eq!(report.status("C"), Some(TaskState::Skipped));
        assert_eq!(report.status("D"), Some(TaskState::Skipped));
        assert_eq!(report.skip_reason("B"), Some("dependency 'A' failed"));
        assert_eq!(report.skip_reason("D"), Some("dependency 'B' skipped"));
        assert_eq!(dependents.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.duration("B"), None);

        let summary = report.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_limit_one_serializes() {
        let tracker = Arc::new(Tracker::default());
        let mut registry = Registry::new();
        for name in ["a", "b", "c", "d", "e"] {
            registry.register(name, Vec::<String>::new(), tracker.action(3, false)).unwrap();
        }
        registry.register("all", ["a", "b", "c", "d", "e"], Action::Noop).unwrap();

        let observed = Arc::new(Mutex::new((0usize, 0usize)));
        let watcher = Arc::clone(&observed);
        let sink = move |t: &Transition| {
            let mut guard = watcher.lock().unwrap();
            match t.to {
                TaskState::Running => {
                    guard.0 += 1;
                    guard.1 = guard.1.max(guard.0);
                }
                TaskState::Succeeded | TaskState::Failed => guard.0 -= 1,
                _ => {}
            }
        };

        let plan = resolve(&registry, &["all"]).unwrap();
        let report = Executor::new(options().with_concurrency(1))
            .with_sink(Arc::new(sink))
            .execute(&plan)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
        assert_eq!(observed.lock().unwrap().1, 1);

        // Serialized order is a valid topological order
        let mut finished: Vec<_> = report.entries().iter().collect();
        finished.sort_by_key(|r| r.started_at);
        assert_eq!(finished.last().unwrap().name.as_str(), "all");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let tracker = Arc::new(Tracker::default());
        let mut registry = Registry::new();
        let mut leaves = Vec::new();
        for i in 0..10 {
            let name = format!("leaf-{i}");
            registry.register(&name, Vec::<String>::new(), tracker.action(10, false)).unwrap();
            leaves.push(name);
        }
        registry.register("all", leaves, Action::Noop).unwrap();

        let report = run(&registry, &["all"], options().with_concurrency(3)).await;

        assert!(report.is_success());
        assert!(tracker.peak.load(Ordering::SeqCst) <= 3);
        assert!(tracker.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_keep_going_collects_all_failures() {
        let tracker = Arc::new(Tracker::default());
        let mut registry = Registry::new();
        registry.register("s3-testnet", Vec::<String>::new(), tracker.action(2, true)).unwrap();
        registry.register("s3-mainnet", Vec::<String>::new(), tracker.action(2, true)).unwrap();
        registry.register("zip-web", Vec::<String>::new(), tracker.action(5, false)).unwrap();
        registry.register("zip-desktop", Vec::<String>::new(), tracker.action(5, false)).unwrap();
        registry
            .register("all", ["s3-testnet", "s3-mainnet", "zip-web", "zip-desktop"], Action::Noop)
            .unwrap();

        let report = run(&registry, &["all"], options().with_fail_fast(false)).await;

        let failed: Vec<_> = report.failed_tasks().map(|r| r.name.as_str()).collect();
        assert_eq!(failed, vec!["s3-testnet", "s3-mainnet"]);
        assert_eq!(report.status("zip-web"), Some(TaskState::Succeeded));
        assert_eq!(report.status("zip-desktop"), Some(TaskState::Succeeded));
        assert_eq!(report.status("all"), Some(TaskState::Skipped));
        assert!(!report.aborted);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_unstarted_and_lets_running_settle() {
        let tracker = Arc::new(Tracker::default());
        let slow = Arc::new(Tracker::default());
        let later = Arc::new(Tracker::default());
        let mut registry = Registry::new();
        registry.register("fails", Vec::<String>::new(), tracker.action(1, true)).unwrap();
        registry.register("slow", Vec::<String>::new(), slow.action(30, false)).unwrap();
        registry.register("after-slow", ["slow"], later.action(1, false)).unwrap();
        registry.register("top", ["fails", "after-slow"], Action::Noop).unwrap();

        let report = run(&registry, &["top"], options()).await;

        assert_eq!(report.status("fails"), Some(TaskState::Failed));
        // Already running when the failure landed, so it is not interrupted
        assert_eq!(report.status("slow"), Some(TaskState::Succeeded));
        assert_eq!(report.status("after-slow"), Some(TaskState::Skipped));
        assert_eq!(
            report.skip_reason("after-slow"),
            Some("cancelled after failure of 'fails'")
        );
        assert_eq!(later.calls.load(Ordering::SeqCst), 0);
        assert!(report.aborted);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_context_token() {
        let mut registry = Registry::new();
        registry
            .register(
                "fails",
                Vec::<String>::new(),
                Action::sync(|_| Err(anyhow::anyhow!("lint errors"))),
            )
            .unwrap();
        registry
            .register(
                "watcher",
                Vec::<String>::new(),
                Action::deferred(|ctx: TaskContext| async move {
                    let cancelled =
                        tokio::time::timeout(Duration::from_secs(5), ctx.cancellation().cancelled())
                            .await;
                    anyhow::ensure!(cancelled.is_ok(), "never cancelled");
                    anyhow::bail!("stopped early")
                }),
            )
            .unwrap();
        registry.register("all", ["fails", "watcher"], Action::Noop).unwrap();

        let report = run(&registry, &["all"], options()).await;

        assert_eq!(report.status("watcher"), Some(TaskState::Failed));
        assert_eq!(report.error("watcher").unwrap().to_string(), "stopped early");
    }

    #[tokio::test]
    async fn test_malformed_action_is_flagged() {
        let mut registry = Registry::new();
        registry
            .register(
                "eslint",
                Vec::<String>::new(),
                Action::callback(|_, done| {
                    done.succeed();
                    Completion::Ready(Ok(()))
                }),
            )
            .unwrap();

        let report = run(&registry, &["eslint"], options()).await;

        assert_eq!(report.status("eslint"), Some(TaskState::Failed));
        assert!(report.record("eslint").unwrap().is_malformed());
        assert_eq!(report.summary().malformed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_from_options_and_task() {
        let hang = || {
            Action::deferred(|_ctx: TaskContext| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        };

        let mut registry = Registry::new();
        registry.register("uses-default", Vec::<String>::new(), hang()).unwrap();
        let own = Task::new("own-timeout", Vec::<String>::new(), hang())
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        registry.register_task(own, Overwrite::Deny).unwrap();
        registry.register("all", ["uses-default", "own-timeout"], Action::Noop).unwrap();

        let options = options()
            .with_fail_fast(false)
            .with_task_timeout(Some(Duration::from_secs(10)));
        let report = run(&registry, &["all"], options).await;

        assert!(matches!(
            report.error("uses-default"),
            Some(TaskError::Timeout(d)) if *d == Duration::from_secs(10)
        ));
        assert!(matches!(
            report.error("own-timeout"),
            Some(TaskError::Timeout(d)) if *d == Duration::from_secs(2)
        ));
    }

    #[tokio::test]
    async fn test_wave_barrier_holds_next_wave() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();

        let step = |label: &'static str, delay: u64, log: Arc<Mutex<Vec<String>>>| {
            Action::deferred(move |_ctx: TaskContext| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("start {label}"));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().unwrap().push(format!("end {label}"));
                    Ok(())
                }
            })
        };

        registry.register("fast", Vec::<String>::new(), step("fast", 1, order.clone())).unwrap();
        registry.register("slow", Vec::<String>::new(), step("slow", 40, order.clone())).unwrap();
        registry.register("after-fast", ["fast"], step("after-fast", 1, order.clone())).unwrap();
        registry.register("all", ["slow", "after-fast"], Action::Noop).unwrap();

        let report = run(&registry, &["all"], options().with_wave_barrier(true)).await;
        assert!(report.is_success());

        let log = order.lock().unwrap().clone();
        let end_slow = log.iter().position(|e| e == "end slow").unwrap();
        let start_after = log.iter().position(|e| e == "start after-fast").unwrap();
        assert!(end_slow < start_after, "{log:?}");
    }

    #[tokio::test]
    async fn test_transitions_are_emitted_in_lifecycle_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&events);
        let mut registry = Registry::new();
        registry.register("A", Vec::<String>::new(), Action::sync(|_| Ok(()))).unwrap();
        registry
            .register("B", ["A"], Action::sync(|_| Err(anyhow::anyhow!("nope"))))
            .unwrap();
        registry.register("C", ["B"], Action::Noop).unwrap();

        let plan = resolve(&registry, &["C"]).unwrap();
        Executor::new(options())
            .with_sink(Arc::new(move |t: &Transition| {
                recorder.lock().unwrap().push((t.task.to_string(), t.from, t.to));
            }))
            .execute(&plan)
            .await
            .unwrap();

        use TaskState::*;
        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("A".to_string(), Pending, Running),
                ("A".to_string(), Running, Succeeded),
                ("B".to_string(), Pending, Running),
                ("B".to_string(), Running, Failed),
                ("C".to_string(), Pending, Skipped),
            ]
        );
    }

    #[tokio::test]
    async fn test_live_snapshot_through_ledger() {
        let mut registry = Registry::new();
        registry
            .register(
                "wait",
                Vec::<String>::new(),
                Action::deferred(|_ctx: TaskContext| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                }),
            )
            .unwrap();
        let plan = resolve(&registry, &["wait"]).unwrap();
        let ledger = ReportLedger::new(RunId::new(), &plan);
        let observer = ledger.clone();

        let executor = Executor::new(options());
        let run = executor.execute_with_ledger(&plan, ledger);
        let watch = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            observer.snapshot()
        };
        let (report, live) = tokio::join!(run, watch);

        assert_eq!(live.status("wait"), Some(TaskState::Running));
        assert_eq!(live.summary().running, 1);
        assert!(!live.is_final());
        assert_eq!(report.unwrap().status("wait"), Some(TaskState::Succeeded));
    }

    #[tokio::test]
    async fn test_mismatched_ledger_rejected() {
        let mut registry = Registry::new();
        registry.register("a", Vec::<String>::new(), Action::Noop).unwrap();
        registry.register("b", Vec::<String>::new(), Action::Noop).unwrap();
        let plan_a = resolve(&registry, &["a"]).unwrap();
        let plan_b = resolve(&registry, &["b"]).unwrap();

        let ledger = ReportLedger::new(RunId::new(), &plan_a);
        let err = Executor::new(options())
            .execute_with_ledger(&plan_b, ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_used_ledger_rejected() {
        let tracker = Arc::new(Tracker::default());
        let mut registry = Registry::new();
        registry.register("babel", Vec::<String>::new(), tracker.action(1, false)).unwrap();
        registry.register("uglify", ["babel"], tracker.action(1, false)).unwrap();
        let plan = resolve(&registry, &["uglify"]).unwrap();
        let executor = Executor::new(options());

        let ledger = ReportLedger::new(RunId::new(), &plan);
        let report = executor.execute_with_ledger(&plan, ledger.clone()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 2);

        // A finished ledger cannot drive a second run
        let again = tokio::time::timeout(
            Duration::from_secs(2),
            executor.execute_with_ledger(&plan, ledger),
        )
        .await
        .expect("second run must not hang");
        assert!(matches!(again, Err(GraphError::InvalidState(_))));
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 2);

        // Same for a ledger someone else has already advanced
        let advanced = ReportLedger::new(RunId::new(), &plan);
        let babel = TaskName::parse("babel").unwrap();
        advanced.transition(&babel, TaskState::Running, None, None).unwrap();
        let err = executor.execute_with_ledger(&plan, advanced).await.unwrap_err();
        assert!(matches!(err, GraphError::InvalidState(_)));
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let registry = Registry::new();
        let plan = resolve::<&str>(&registry, &[]).unwrap();
        let err = Executor::new(options().with_concurrency(0))
            .execute(&plan)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_resources_reach_actions() {
        struct Dist(&'static str);

        let mut registry = Registry::new();
        registry
            .register(
                "copy",
                Vec::<String>::new(),
                Action::sync(|ctx| {
                    let dist = ctx.resources().require::<Dist>()?;
                    anyhow::ensure!(dist.0 == "dist/web", "unexpected root {}", dist.0);
                    Ok(())
                }),
            )
            .unwrap();

        let plan = resolve(&registry, &["copy"]).unwrap();
        let report = Executor::new(options())
            .with_resources(Resources::new().with(Dist("dist/web")))
            .execute(&plan)
            .await
            .unwrap();
        assert!(report.is_success());
    }
}
