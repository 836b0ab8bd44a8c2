//! Workflow execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use tokio_util::sync::CancellationToken;
pub use engine::{EngineError, EventHandler, ExecutionEngine, ExecutionEvent, CANCELLED_EXIT_CODE};
pub use executor::{ExecutionResult, StepExecutor};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
