//! Step executor - runs individual steps with the command runner

use crate::{
    core::{FailureKind, Step, StepAction},
    runner::{
        provision_python, CommandExecutor, JobEnvironment, OutputCallback, RunnerError,
        SetupAction,
    },
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of executing a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Step exited with code 0
    Success { output: String },
    /// Step failed but is allowed to (`continue-on-error`)
    SoftFailure {
        exit_code: i32,
        error: String,
        output: String,
    },
    /// Step failed and ends the job
    Failed {
        exit_code: i32,
        error: String,
        kind: FailureKind,
        output: String,
    },
    /// An interpreter was provisioned for the rest of the job
    Provisioned { version: String, location: String },
    /// The step was aborted before it finished
    Cancelled,
}

/// Executes a single step
pub struct StepExecutor<E> {
    executor: E,
}

impl<E: CommandExecutor> StepExecutor<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Execute a step and return the result
    ///
    /// `env` carries state between the steps of a job; a setup action
    /// changes it for every later step.
    pub async fn execute(
        &self,
        step: &Step,
        env: &mut JobEnvironment,
        cancel: &CancellationToken,
        callback: Option<&dyn OutputCallback>,
    ) -> ExecutionResult {
        if cancel.is_cancelled() {
            return ExecutionResult::Cancelled;
        }
        info!("Executing step: {}", step.name);

        match &step.action {
            StepAction::Run { script } => self.run_script(step, script, env, cancel, callback).await,
            StepAction::Uses { action, with } => match SetupAction::parse(action, with) {
                SetupAction::Checkout => {
                    debug!("Checkout uses the local workspace");
                    ExecutionResult::Success {
                        output: format!("Using workspace {}", env.workspace().display()),
                    }
                }
                SetupAction::SetupPython { version } => {
                    self.setup_python(step, version.as_deref(), env, cancel, callback)
                        .await
                }
                SetupAction::Unsupported(action) => {
                    let error = RunnerError::UnsupportedAction(action).to_string();
                    error!("Step {}: {}", step.name, error);
                    Self::failure(step, 1, error, FailureKind::Command, String::new())
                }
            },
        }
    }

    async fn run_script(
        &self,
        step: &Step,
        script: &str,
        env: &JobEnvironment,
        cancel: &CancellationToken,
        callback: Option<&dyn OutputCallback>,
    ) -> ExecutionResult {
        let request = env.request(
            script,
            &step.env,
            step.working_directory.as_deref(),
            step.timeout_secs,
        );
        debug!("Script for step {}:\n{}", step.name, script);

        // Dropping the command future kills the child process
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExecutionResult::Cancelled,
            result = self.executor.execute(&request, callback) => result,
        };

        match result {
            Ok(output) if output.success() => {
                info!("Step {} completed successfully", step.name);
                ExecutionResult::Success {
                    output: output.combined(),
                }
            }
            Ok(output) => {
                let error = format!("process completed with exit code {}", output.exit_code);
                warn!("Step {} failed: {}", step.name, error);
                Self::failure(
                    step,
                    output.exit_code,
                    error,
                    FailureKind::from_stage(step.stage()),
                    output.combined(),
                )
            }
            Err(RunnerError::Cancelled) => ExecutionResult::Cancelled,
            Err(e) => {
                error!("Runner error for step {}: {}", step.name, e);
                let kind = match e {
                    RunnerError::Timeout(_) => FailureKind::Timeout,
                    _ => FailureKind::from_stage(step.stage()),
                };
                Self::failure(step, 1, e.to_string(), kind, String::new())
            }
        }
    }

    async fn setup_python(
        &self,
        step: &Step,
        version: Option<&str>,
        env: &mut JobEnvironment,
        cancel: &CancellationToken,
        callback: Option<&dyn OutputCallback>,
    ) -> ExecutionResult {
        let provision = provision_python(&self.executor, env, version, callback);
        let limit = step.timeout_secs.map(Duration::from_secs);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExecutionResult::Cancelled,
            result = async {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, provision)
                        .await
                        .unwrap_or_else(|_| Err(RunnerError::Timeout(limit.as_secs()))),
                    None => provision.await,
                }
            } => result,
        };

        match result {
            Ok(python) => ExecutionResult::Provisioned {
                version: python.version,
                location: python.venv.display().to_string(),
            },
            Err(RunnerError::Cancelled) => ExecutionResult::Cancelled,
            Err(e) => {
                error!("Provisioning failed for step {}: {}", step.name, e);
                let kind = match e {
                    RunnerError::Timeout(_) => FailureKind::Timeout,
                    _ => FailureKind::Provisioning,
                };
                Self::failure(step, 1, e.to_string(), kind, String::new())
            }
        }
    }

    fn failure(
        step: &Step,
        exit_code: i32,
        error: String,
        kind: FailureKind,
        output: String,
    ) -> ExecutionResult {
        if step.continue_on_error {
            info!("Step {} is allowed to fail, continuing", step.name);
            ExecutionResult::SoftFailure {
                exit_code,
                error,
                output,
            }
        } else {
            ExecutionResult::Failed {
                exit_code,
                error,
                kind,
                output,
            }
        }
    }
}
