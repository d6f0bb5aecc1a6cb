use crate::error::TaskError;
use crate::types::{RunId, TaskName, TaskState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// A task changed state during a run
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub run_id: RunId,
    pub task: TaskName,
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
    /// Time spent running, set when the task settles after running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Why a task was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Receives every state transition of a run.
///
/// Called from the scheduling loop; implementations should return quickly.
pub trait ProgressSink: Send + Sync {
    fn on_transition(&self, transition: &Transition);
}

impl<F> ProgressSink for F
where
    F: Fn(&Transition) + Send + Sync,
{
    fn on_transition(&self, transition: &Transition) {
        self(transition)
    }
}

/// Renders transitions as log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_transition(&self, t: &Transition) {
        match t.to {
            TaskState::Pending => {}
            TaskState::Running => tracing::info!("Starting '{}'...", t.task),
            TaskState::Succeeded => tracing::info!(
                "Finished '{}' after {}",
                t.task,
                format_elapsed(t.elapsed.unwrap_or_default())
            ),
            TaskState::Failed => tracing::error!(
                "'{}' errored after {}: {}",
                t.task,
                format_elapsed(t.elapsed.unwrap_or_default()),
                t.error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
            TaskState::Skipped => tracing::warn!(
                "Skipping '{}' ({})",
                t.task,
                t.reason.as_deref().unwrap_or("not scheduled")
            ),
        }
    }
}

/// Human friendly duration: `850 μs`, `12 ms`, `1.42 s`, `2.5 min`
pub fn format_elapsed(elapsed: Duration) -> String {
    let micros = elapsed.as_micros();
    if micros < 1_000 {
        format!("{} μs", micros)
    } else if micros < 1_000_000 {
        format!("{} ms", elapsed.as_millis())
    } else if elapsed.as_secs() < 60 {
        format!("{:.2} s", elapsed.as_secs_f64())
    } else {
        format!("{:.1} min", elapsed.as_secs_f64() / 60.0)
    }
}
