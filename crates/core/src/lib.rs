// Core task graph engine for Waverun: registry, resolver, executor and run report

pub mod error;
pub mod events;
pub mod graph;
pub mod registry;
pub mod report;
pub mod runner;
pub mod types;

pub use graph::action;

pub use error::{GraphError, Result, TaskError};
pub use events::{ProgressSink, TracingSink, Transition};
pub use graph::{
    resolve, Action, AsyncAction, Completion, Done, Effect, ExecutionPlan, Executor, Resources,
    TaskContext,
};
pub use registry::{Overwrite, Registry, Task, TaskNames};
pub use report::{ReportLedger, RunReport, Summary, TaskRecord};
pub use runner::Runner;
pub use types::*;
