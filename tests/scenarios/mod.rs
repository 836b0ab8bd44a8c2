//! Scenario-based tests for ci-runner

mod matrix_jobs;
mod reference_workflow;
mod step_failures;
mod triggers;
