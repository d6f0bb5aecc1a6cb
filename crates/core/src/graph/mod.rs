// Dependency resolution and execution of task graphs

pub mod action;
pub mod dag;
pub mod executor;

pub use action::{Action, AsyncAction, Completion, Done, Effect, Resources, TaskContext};
pub use dag::{resolve, ExecutionPlan};
pub use executor::Executor;
