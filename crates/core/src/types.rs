use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for one execution request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated name of a registered task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    /// Parse and validate a task name.
    ///
    /// Names must be non-empty, must not start with `-` (they would be
    /// mistaken for command line flags) and may not contain whitespace or
    /// control characters.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name.starts_with('-') {
            Some("name starts with '-'")
        } else if name.chars().any(|c| c.is_whitespace()) {
            Some("name contains whitespace")
        } else if name.chars().any(|c| c.is_control()) {
            Some("name contains control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(GraphError::InvalidName {
                name,
                reason: reason.to_string(),
            }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for TaskName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for TaskName {
    type Error = GraphError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for TaskName {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

/// Lifecycle state of a task within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskState {
    /// Whether the task has settled and will never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Allowed edges: Pending -> Running -> {Succeeded | Failed}, Pending -> Skipped.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Options for one execution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum number of tasks in the Running state at the same time
    pub concurrency_limit: usize,
    /// Stop scheduling new tasks after the first failure
    pub fail_fast: bool,
    /// Default timeout for tasks that do not carry their own
    pub task_timeout: Option<Duration>,
    /// Hold back wave n+1 until every task of wave n has settled
    pub wave_barrier: bool,
}

impl RunOptions {
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_wave_barrier(mut self, wave_barrier: bool) -> Self {
        self.wave_barrier = wave_barrier;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(GraphError::InvalidState(
                "concurrency limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        let concurrency_limit = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            concurrency_limit,
            fail_fast: true,
            task_timeout: None,
            wave_barrier: false,
        }
    }
}
