//! Error types for the task graph engine.

use crate::types::TaskName;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;

/// Result type for registry, resolver and runner operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the task graph engine.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A task with the same name is already registered.
    #[error("task '{name}' is already registered")]
    DuplicateTask { name: String },

    /// A task or dependency name failed validation.
    #[error("invalid task name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// A requested task does not exist.
    #[error("task '{name}' is not registered")]
    UnknownTask { name: String },

    /// A task depends on a name that does not exist.
    #[error("task '{task}' depends on '{missing}', which is not registered")]
    UnresolvedDependency { task: TaskName, missing: TaskName },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<TaskName> },

    /// An action broke its completion contract.
    #[error("task '{task}' has a malformed action: {reason}")]
    MalformedAction { task: TaskName, reason: String },

    /// An action reported an error.
    #[error("task '{task}' failed: {error}")]
    ActionFailure { task: TaskName, error: TaskError },

    /// An action did not settle within its timeout.
    #[error("task '{task}' timed out after {after:?}")]
    Timeout { task: TaskName, after: Duration },

    /// The operation is not allowed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl GraphError {
    /// Whether the error is raised before any task starts.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTask { .. }
                | Self::UnresolvedDependency { .. }
                | Self::CyclicDependency { .. }
        )
    }

    /// Lift a per-task failure into the matching graph error kind.
    pub fn from_task_error(task: TaskName, error: TaskError) -> Self {
        match error {
            TaskError::Malformed(reason) => Self::MalformedAction { task, reason },
            TaskError::Timeout(after) => Self::Timeout { task, after },
            error => Self::ActionFailure { task, error },
        }
    }
}

fn format_cycle(cycle: &[TaskName]) -> String {
    cycle
        .iter()
        .map(TaskName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failure recorded for a single task in the run report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The action returned or signalled an error.
    #[error("{0:#}")]
    Action(Arc<anyhow::Error>),

    /// The action violated its completion contract (caller bug).
    #[error("malformed action: {0}")]
    Malformed(String),

    /// The action exceeded its timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The action panicked.
    #[error("action panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn action(error: anyhow::Error) -> Self {
        Self::Action(Arc::new(error))
    }

    /// Malformed actions are flagged separately from ordinary failures.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    /// Short machine readable kind, used in serialized reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Action(_) => "action_failure",
            Self::Malformed(_) => "malformed_action",
            Self::Timeout(_) => "timeout",
            Self::Panicked(_) => "panicked",
        }
    }
}

impl Serialize for TaskError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("TaskError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
