use crate::error::{GraphError, Result, TaskError};
use crate::events::Transition;
use crate::graph::ExecutionPlan;
use crate::types::{RunId, TaskName, TaskState};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Outcome of one task within a run
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub name: TaskName,
    pub wave: usize,
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Option<Duration>,
    pub error: Option<TaskError>,
    pub skip_reason: Option<String>,
}

impl TaskRecord {
    /// Set for actions that broke their completion contract
    pub fn is_malformed(&self) -> bool {
        self.error.as_ref().is_some_and(TaskError::is_malformed)
    }
}

/// Aggregate counts of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub running: usize,
    /// Failed tasks whose action was malformed, counted within `failed` too
    pub malformed: usize,
    #[serde(rename = "total_elapsed_ms", serialize_with = "serialize_duration_millis")]
    pub total_elapsed: Duration,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.pending + self.running
    }
}

/// Per-task outcome ledger for one execution request.
///
/// Obtained from [`ReportLedger::snapshot`] while a run is in progress or as
/// the final value returned by the executor.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Fail-fast stopped scheduling after a failure
    pub aborted: bool,
    entries: Vec<TaskRecord>,
    summary: Summary,
    #[serde(skip)]
    index: HashMap<TaskName, usize>,
}

impl RunReport {
    pub fn status(&self, name: &str) -> Option<TaskState> {
        self.record(name).map(|r| r.state)
    }

    /// Time spent running, `None` for tasks that never ran
    pub fn duration(&self, name: &str) -> Option<Duration> {
        self.record(name).and_then(|r| r.elapsed)
    }

    pub fn error(&self, name: &str) -> Option<&TaskError> {
        self.record(name).and_then(|r| r.error.as_ref())
    }

    pub fn skip_reason(&self, name: &str) -> Option<&str> {
        self.record(name).and_then(|r| r.skip_reason.as_deref())
    }

    pub fn record(&self, name: &str) -> Option<&TaskRecord> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Records in plan order
    pub fn entries(&self) -> &[TaskRecord] {
        &self.entries
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.entries
            .iter()
            .filter(|r| r.state == TaskState::Failed)
    }

    /// Failed tasks lifted into graph errors, in plan order
    pub fn failures(&self) -> Vec<GraphError> {
        self.failed_tasks()
            .filter_map(|r| {
                r.error
                    .clone()
                    .map(|error| GraphError::from_task_error(r.name.clone(), error))
            })
            .collect()
    }

    pub fn is_final(&self) -> bool {
        self.finished_at.is_some()
    }

    /// True when no task failed
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }

    /// Process exit status for the run
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

struct LedgerState {
    run_id: RunId,
    started_at: DateTime<Utc>,
    clock: Instant,
    finished: Option<(DateTime<Utc>, Duration)>,
    aborted: bool,
    records: Vec<TaskRecord>,
    index: HashMap<TaskName, usize>,
    running_since: HashMap<usize, Instant>,
}

/// Shared, synchronized run ledger.
///
/// The executor is the only writer; clones may be held by other tasks to
/// read live progress through [`ReportLedger::snapshot`].
#[derive(Clone)]
pub struct ReportLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl ReportLedger {
    /// Create a ledger with every task of `plan` in the Pending state
    pub fn new(run_id: RunId, plan: &ExecutionPlan) -> Self {
        let mut records = Vec::with_capacity(plan.len());
        let mut index = HashMap::with_capacity(plan.len());
        for (wave, names) in plan.waves().iter().enumerate() {
            for name in names {
                index.insert(name.clone(), records.len());
                records.push(TaskRecord {
                    name: name.clone(),
                    wave,
                    state: TaskState::Pending,
                    started_at: None,
                    finished_at: None,
                    elapsed: None,
                    error: None,
                    skip_reason: None,
                });
            }
        }

        Self {
            state: Arc::new(Mutex::new(LedgerState {
                run_id,
                started_at: Utc::now(),
                clock: Instant::now(),
                finished: None,
                aborted: false,
                records,
                index,
                running_since: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // A poisoned ledger still holds consistent per-entry data
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn run_id(&self) -> RunId {
        self.lock().run_id
    }

    pub fn state(&self, name: &str) -> Option<TaskState> {
        let state = self.lock();
        state.index.get(name).map(|&i| state.records[i].state)
    }

    /// Whether the ledger covers exactly the tasks of `plan`
    pub fn matches(&self, plan: &ExecutionPlan) -> bool {
        let state = self.lock();
        state.records.len() == plan.len() && plan.order().all(|n| state.index.contains_key(n))
    }

    /// True until the first transition is applied or the ledger is finished
    pub fn is_fresh(&self) -> bool {
        let state = self.lock();
        state.finished.is_none()
            && state
                .records
                .iter()
                .all(|record| record.state == TaskState::Pending)
    }

    /// Apply a state change and return the event describing it.
    ///
    /// Transitions that break the monotonic lifecycle are rejected with
    /// `InvalidState`; the stored record is left untouched.
    pub fn transition(
        &self,
        name: &TaskName,
        to: TaskState,
        error: Option<TaskError>,
        reason: Option<String>,
    ) -> Result<Transition> {
        let mut state = self.lock();
        if state.finished.is_some() {
            return Err(GraphError::InvalidState(format!(
                "run {} is already finalized",
                state.run_id
            )));
        }

        let slot = *state.index.get(name).ok_or_else(|| GraphError::UnknownTask {
            name: name.to_string(),
        })?;

        let from = state.records[slot].state;
        if !from.can_transition_to(to) {
            return Err(GraphError::InvalidState(format!(
                "task '{}' cannot move from {} to {}",
                name, from, to
            )));
        }

        let now = Utc::now();
        let mut elapsed = None;
        match to {
            TaskState::Running => {
                state.running_since.insert(slot, Instant::now());
                state.records[slot].started_at = Some(now);
            }
            TaskState::Succeeded | TaskState::Failed => {
                elapsed = state.running_since.remove(&slot).map(|t| t.elapsed());
                let record = &mut state.records[slot];
                record.finished_at = Some(now);
                record.elapsed = elapsed;
                record.error = error.clone();
            }
            TaskState::Skipped => {
                let record = &mut state.records[slot];
                record.finished_at = Some(now);
                record.skip_reason = reason.clone();
            }
            TaskState::Pending => {}
        }
        state.records[slot].state = to;

        Ok(Transition {
            run_id: state.run_id,
            task: name.clone(),
            from,
            to,
            at: now,
            elapsed,
            error,
            reason,
        })
    }

    pub(crate) fn mark_aborted(&self) {
        self.lock().aborted = true;
    }

    /// Current view of the run; cheap enough to poll for progress output
    pub fn snapshot(&self) -> RunReport {
        let state = self.lock();
        build_report(&state)
    }

    /// Freeze the ledger and return the final report
    pub(crate) fn finish(&self) -> RunReport {
        let mut state = self.lock();
        if state.finished.is_none() {
            state.finished = Some((Utc::now(), state.clock.elapsed()));
        }
        build_report(&state)
    }
}

impl std::fmt::Debug for ReportLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ReportLedger")
            .field("run_id", &state.run_id)
            .field("tasks", &state.records.len())
            .field("finished", &state.finished.is_some())
            .finish()
    }
}

fn build_report(state: &LedgerState) -> RunReport {
    let mut summary = Summary {
        total_elapsed: state
            .finished
            .map(|(_, elapsed)| elapsed)
            .unwrap_or_else(|| state.clock.elapsed()),
        ..Summary::default()
    };

    for record in &state.records {
        match record.state {
            TaskState::Pending => summary.pending += 1,
            TaskState::Running => summary.running += 1,
            TaskState::Succeeded => summary.succeeded += 1,
            TaskState::Failed => {
                summary.failed += 1;
                if record.is_malformed() {
                    summary.malformed += 1;
                }
            }
            TaskState::Skipped => summary.skipped += 1,
        }
    }

    RunReport {
        run_id: state.run_id,
        started_at: state.started_at,
        finished_at: state.finished.map(|(at, _)| at),
        aborted: state.aborted,
        entries: state.records.clone(),
        summary,
        index: state.index.clone(),
    }
}

fn serialize_millis<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

fn serialize_duration_millis<S: Serializer>(
    value: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}
