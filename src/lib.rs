//! ci-runner - run CI workflow files locally

pub mod cli;
pub mod core;
pub mod execution;
pub mod runner;

// Re-export commonly used types
pub use core::{Event, ExecutionStatus, Job, PlanOptions, Step, StepState, Workflow, WorkflowRun};
pub use execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
pub use runner::{CommandExecutor, CommandOutput, CommandRequest, RunnerError, ShellRunner};
