use crate::action::Action;
use crate::error::{GraphError, Result};
use crate::types::TaskName;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A named unit of work with declared dependencies
#[derive(Debug, Clone)]
pub struct Task {
    pub name: TaskName,
    pub dependencies: Vec<TaskName>,
    pub action: Action,
    pub timeout: Option<Duration>,
    pub description: Option<String>,
}

impl Task {
    /// Build a task, validating its name and dependency names.
    ///
    /// Repeated dependency names are collapsed, keeping the first occurrence.
    pub fn new<I, S>(name: impl Into<String>, dependencies: I, action: Action) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = TaskName::parse(name)?;
        let mut seen = HashSet::new();
        let mut deps = Vec::new();
        for dep in dependencies {
            let dep = TaskName::parse(dep)?;
            if seen.insert(dep.clone()) {
                deps.push(dep);
            }
        }

        Ok(Self {
            name,
            dependencies: deps,
            action,
            timeout: None,
            description: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Policy for registering a name that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overwrite {
    #[default]
    Deny,
    /// Replace the definition but keep the original registration slot
    Replace,
}

/// Task registry, keyed by name and ordered by registration.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: Vec<Task>,
    index: HashMap<TaskName, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Fails with `DuplicateTask` if the name is taken.
    pub fn register<I, S>(&mut self, name: &str, dependencies: I, action: Action) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let task = Task::new(name, dependencies, action)?;
        self.register_task(task, Overwrite::Deny)
    }

    pub fn register_task(&mut self, task: Task, overwrite: Overwrite) -> Result<()> {
        match (self.index.get(&task.name), overwrite) {
            (Some(_), Overwrite::Deny) => Err(GraphError::DuplicateTask {
                name: task.name.to_string(),
            }),
            (Some(&slot), Overwrite::Replace) => {
                tracing::debug!("Replacing task '{}'", task.name);
                self.tasks[slot] = task;
                Ok(())
            }
            (None, _) => {
                tracing::trace!(
                    "Registered task '{}' with {} dependencies",
                    task.name,
                    task.dependencies.len()
                );
                self.index.insert(task.name.clone(), self.tasks.len());
                self.tasks.push(task);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&Task> {
        self.index
            .get(name)
            .map(|&slot| &self.tasks[slot])
            .ok_or_else(|| GraphError::UnknownTask {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registration index of a task, used as the deterministic tie-break
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Names of all registered tasks in registration order.
    ///
    /// The iterator is lazy and can be cloned to restart it.
    pub fn list(&self) -> TaskNames<'_> {
        TaskNames {
            inner: self.tasks.iter(),
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> + Clone {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Lazy iterator over registered task names
#[derive(Debug, Clone)]
pub struct TaskNames<'a> {
    inner: std::slice::Iter<'a, Task>,
}

impl<'a> Iterator for TaskNames<'a> {
    type Item = &'a TaskName;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|task| &task.name)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for TaskNames<'_> {}
