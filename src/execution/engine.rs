//! Main execution engine - orchestrates a workflow run

use crate::{
    core::{
        stage::StageKind, ExecutionStatus, FailureKind, Job, JobFailure, StepOutcome, StepState,
        WorkflowRun,
    },
    execution::{ExecutionResult, ExecutionScheduler, SchedulingStrategy, StepExecutor},
    runner::{CommandExecutor, JobEnvironment, OutputCallback, OutputStream},
};
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Exit code of a job or run aborted by the user
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Events that can occur during a workflow run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow_name: String,
        total_jobs: usize,
    },
    JobStarted {
        job_id: String,
    },
    StepStarted {
        job_id: String,
        step_index: usize,
        total_steps: usize,
        step_name: String,
        stage: StageKind,
    },
    StepOutput {
        job_id: String,
        step_name: String,
        stream: OutputStream,
        line: String,
    },
    StepCompleted {
        job_id: String,
        step_name: String,
        exit_code: i32,
        outcome: StepOutcome,
    },
    StepFailed {
        job_id: String,
        step_name: String,
        exit_code: i32,
        kind: FailureKind,
        error: String,
        /// Captured output of the failed command
        output: String,
    },
    StepSkipped {
        job_id: String,
        step_name: String,
        reason: String,
    },
    JobCompleted {
        job_id: String,
        status: ExecutionStatus,
        exit_code: i32,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
        exit_code: i32,
    },
}

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job task failed: {0}")]
    JobPanicked(String),
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

type HandlerList = Arc<Mutex<Vec<EventHandler>>>;

fn emit(handlers: &HandlerList, event: ExecutionEvent) {
    let handlers = handlers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    for handler in handlers.iter() {
        handler(event.clone());
    }
}

/// Forwards command output of one step as `StepOutput` events
struct StepOutputForwarder {
    job_id: String,
    step_name: String,
    handlers: HandlerList,
}

impl OutputCallback for StepOutputForwarder {
    fn on_line(&self, stream: OutputStream, line: &str) {
        emit(
            &self.handlers,
            ExecutionEvent::StepOutput {
                job_id: self.job_id.clone(),
                step_name: self.step_name.clone(),
                stream,
                line: line.to_string(),
            },
        );
    }
}

/// Main workflow execution engine
pub struct ExecutionEngine<E> {
    strategy: SchedulingStrategy,
    executor: Arc<StepExecutor<E>>,
    event_handlers: HandlerList,
    cancel: CancellationToken,
}

impl<E> Clone for ExecutionEngine<E> {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy,
            executor: self.executor.clone(),
            event_handlers: self.event_handlers.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<E: CommandExecutor + 'static> ExecutionEngine<E> {
    pub fn new(executor: E, strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            executor: Arc::new(StepExecutor::new(executor)),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    /// Token that aborts the whole run when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        emit(&self.event_handlers, event);
    }

    /// Execute every job of a planned run
    ///
    /// Jobs are independent: a failing job never stops another unless its
    /// matrix group sets `fail-fast`. The run's exit code is the exit code
    /// of the first failed job in plan order.
    pub async fn execute(&self, run: &mut WorkflowRun) -> Result<(), EngineError> {
        let run_id = run.state.run_id;
        let strategy = self.strategy.limited_to(run.max_parallel);

        info!(
            "Starting workflow run: {} ({}, {:?})",
            run.workflow_name, run_id, strategy
        );
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            workflow_name: run.workflow_name.clone(),
            total_jobs: run.jobs.len(),
        });
        run.state.start(run.jobs.len());

        // Each matrix group shares a token so fail-fast cancels its siblings
        let mut groups: HashMap<String, CancellationToken> = HashMap::new();
        for job in &run.jobs {
            groups
                .entry(job.key.clone())
                .or_insert_with(|| self.cancel.child_token());
        }

        let mut scheduler = ExecutionScheduler::new(strategy);
        let mut pending: Vec<Option<Job>> = run.jobs.drain(..).map(Some).collect();
        let mut finished: Vec<Option<Job>> = (0..pending.len()).map(|_| None).collect();
        for index in 0..pending.len() {
            scheduler.enqueue(index);
        }

        let mut running = JoinSet::new();
        loop {
            for index in scheduler.next_jobs(running.len()) {
                let Some(job) = pending[index].take() else { continue };
                let cancel = groups
                    .get(&job.key)
                    .cloned()
                    .unwrap_or_else(|| self.cancel.child_token());
                let engine = self.clone();
                let workspace = run.workspace.clone();
                running.spawn(async move { (index, engine.run_job(job, &workspace, &cancel).await) });
            }

            let Some(joined) = running.join_next().await else { break };
            let (index, job) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Job task failed: {}", e);
                    running.abort_all();
                    return Err(EngineError::JobPanicked(e.to_string()));
                }
            };

            if job.state.is_success() {
                run.state.completed_jobs += 1;
            } else {
                run.state.failed_jobs += 1;
                let cancelled = matches!(
                    job.state.failure.as_ref().map(|f| f.kind),
                    Some(FailureKind::Cancelled)
                );
                if job.fail_fast && !cancelled {
                    if let Some(group) = groups.get(&job.key) {
                        warn!("Job {} failed, cancelling the rest of '{}'", job.id, job.key);
                        group.cancel();
                    }
                }
            }
            finished[index] = Some(job);
        }

        run.jobs = finished.into_iter().flatten().collect();

        let (status, exit_code) = run_outcome(&run.jobs, self.cancel.is_cancelled());
        run.state.finish(status, exit_code);

        info!(
            "Workflow run finished: {} - {:?} (exit code {})",
            run.workflow_name, status, exit_code
        );
        self.emit_event(ExecutionEvent::RunCompleted {
            run_id,
            status,
            exit_code,
        });

        Ok(())
    }

    /// Execute a single job outside of a run, in the current directory
    pub async fn execute_job(&self, job: Job) -> Job {
        let cancel = self.cancel.child_token();
        self.run_job(job, Path::new("."), &cancel).await
    }

    async fn run_job(&self, mut job: Job, workspace: &Path, cancel: &CancellationToken) -> Job {
        job.state.start();
        self.emit_event(ExecutionEvent::JobStarted {
            job_id: job.id.clone(),
        });

        if cancel.is_cancelled() {
            info!("Job {} cancelled before it started", job.id);
            job.state.fail(JobFailure {
                step: String::new(),
                kind: FailureKind::Cancelled,
                exit_code: CANCELLED_EXIT_CODE,
            });
            self.skip_from(&mut job, 0, "job was cancelled");
            return self.finish_job(job);
        }

        info!("Starting job {} ({} steps)", job.id, job.steps.len());
        let mut env = match JobEnvironment::new(workspace, &job_variables(&job, workspace)) {
            Ok(env) => env,
            Err(e) => {
                error!("Failed to prepare environment for job {}: {}", job.id, e);
                job.state.fail(JobFailure {
                    step: String::new(),
                    kind: FailureKind::Provisioning,
                    exit_code: 1,
                });
                self.skip_from(&mut job, 0, "job environment could not be created");
                return self.finish_job(job);
            }
        };

        for index in 0..job.steps.len() {
            let step_name = job.steps[index].name.clone();
            let started_at = Utc::now();
            job.steps[index].state = StepState::Running { started_at };
            self.emit_event(ExecutionEvent::StepStarted {
                job_id: job.id.clone(),
                step_index: index,
                total_steps: job.steps.len(),
                step_name: step_name.clone(),
                stage: job.steps[index].stage(),
            });

            let forwarder = StepOutputForwarder {
                job_id: job.id.clone(),
                step_name: step_name.clone(),
                handlers: self.event_handlers.clone(),
            };
            let result = self
                .executor
                .execute(&job.steps[index], &mut env, cancel, Some(&forwarder))
                .await;

            let stop = self.record_step(&mut job, index, started_at, result);
            if let Some(reason) = stop {
                self.skip_from(&mut job, index + 1, &reason);
                break;
            }
        }

        if job.state.failure.is_none() {
            job.state.complete();
        }
        self.finish_job(job)
    }

    /// Apply a step result; returns the skip reason when the job must stop
    fn record_step(
        &self,
        job: &mut Job,
        index: usize,
        started_at: chrono::DateTime<Utc>,
        result: ExecutionResult,
    ) -> Option<String> {
        let job_id = job.id.clone();
        let step_name = job.steps[index].name.clone();

        let (state, event, stop) = match result {
            ExecutionResult::Success { output } => (
                completed(0, StepOutcome::Success, output, started_at),
                ExecutionEvent::StepCompleted {
                    job_id,
                    step_name,
                    exit_code: 0,
                    outcome: StepOutcome::Success,
                },
                None,
            ),
            ExecutionResult::Provisioned { version, location } => (
                completed(
                    0,
                    StepOutcome::Success,
                    format!("Python {} at {}", version, location),
                    started_at,
                ),
                ExecutionEvent::StepCompleted {
                    job_id,
                    step_name,
                    exit_code: 0,
                    outcome: StepOutcome::Success,
                },
                None,
            ),
            ExecutionResult::SoftFailure {
                exit_code,
                error,
                output,
            } => {
                warn!("Step {} failed but continues: {}", step_name, error);
                (
                    completed(exit_code, StepOutcome::Failure, output, started_at),
                    ExecutionEvent::StepCompleted {
                        job_id,
                        step_name,
                        exit_code,
                        outcome: StepOutcome::Failure,
                    },
                    None,
                )
            }
            ExecutionResult::Failed {
                exit_code,
                error,
                kind,
                output,
            } => {
                job.state.fail(JobFailure {
                    step: step_name.clone(),
                    kind,
                    exit_code,
                });
                let reason = format!("step '{}' failed", step_name);
                (
                    StepState::Failed {
                        exit_code,
                        error: error.clone(),
                        started_at,
                        failed_at: Utc::now(),
                    },
                    ExecutionEvent::StepFailed {
                        job_id,
                        step_name,
                        exit_code,
                        kind,
                        error,
                        output,
                    },
                    Some(reason),
                )
            }
            ExecutionResult::Cancelled => {
                job.state.fail(JobFailure {
                    step: step_name.clone(),
                    kind: FailureKind::Cancelled,
                    exit_code: CANCELLED_EXIT_CODE,
                });
                (
                    StepState::Failed {
                        exit_code: CANCELLED_EXIT_CODE,
                        error: "cancelled".to_string(),
                        started_at,
                        failed_at: Utc::now(),
                    },
                    ExecutionEvent::StepFailed {
                        job_id,
                        step_name,
                        exit_code: CANCELLED_EXIT_CODE,
                        kind: FailureKind::Cancelled,
                        error: "cancelled".to_string(),
                        output: String::new(),
                    },
                    Some("job was cancelled".to_string()),
                )
            }
        };

        job.steps[index].state = state;
        self.emit_event(event);
        stop
    }

    fn skip_from(&self, job: &mut Job, from: usize, reason: &str) {
        for step in job.steps.iter_mut().skip(from) {
            step.state = StepState::Skipped {
                reason: reason.to_string(),
            };
            self.emit_event(ExecutionEvent::StepSkipped {
                job_id: job.id.clone(),
                step_name: step.name.clone(),
                reason: reason.to_string(),
            });
        }
    }

    fn finish_job(&self, job: Job) -> Job {
        info!(
            "Job {} finished: {:?} (exit code {})",
            job.id, job.state.status, job.state.exit_code
        );
        self.emit_event(ExecutionEvent::JobCompleted {
            job_id: job.id.clone(),
            status: job.state.status,
            exit_code: job.state.exit_code,
        });
        job
    }
}

fn completed(
    exit_code: i32,
    outcome: StepOutcome,
    output: String,
    started_at: chrono::DateTime<Utc>,
) -> StepState {
    StepState::Completed {
        exit_code,
        outcome,
        output,
        started_at,
        completed_at: Utc::now(),
    }
}

/// Variables every step of a job sees, before step-level `env:`
fn job_variables(job: &Job, workspace: &Path) -> IndexMap<String, String> {
    let mut vars = IndexMap::new();
    vars.insert("CI".to_string(), "true".to_string());
    vars.insert(
        "GITHUB_WORKSPACE".to_string(),
        absolute(workspace).display().to_string(),
    );
    vars.insert("GITHUB_JOB".to_string(), job.key.clone());
    for (var, key) in [
        ("GITHUB_EVENT_NAME", "github.event_name"),
        ("GITHUB_REF", "github.ref"),
        ("GITHUB_REF_NAME", "github.ref_name"),
        ("GITHUB_RUN_ID", "github.run_id"),
    ] {
        if let Some(value) = job.context.get(key) {
            vars.insert(var.to_string(), value.clone());
        }
    }
    vars.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Final status and exit code of a finished run
///
/// A job cancelled because a sibling failed does not hide the sibling's
/// exit code; a run aborted by the user exits with 130.
fn run_outcome(jobs: &[Job], aborted: bool) -> (ExecutionStatus, i32) {
    if jobs.iter().all(|j| j.state.is_success()) {
        return (ExecutionStatus::Completed, 0);
    }
    if aborted {
        return (ExecutionStatus::Cancelled, CANCELLED_EXIT_CODE);
    }

    let first_failure = jobs.iter().find(|j| {
        j.state.status == ExecutionStatus::Failed
            && !matches!(
                j.state.failure.as_ref().map(|f| f.kind),
                Some(FailureKind::Cancelled)
            )
    });
    match first_failure {
        Some(job) => (ExecutionStatus::Failed, job.state.exit_code),
        None => (ExecutionStatus::Cancelled, CANCELLED_EXIT_CODE),
    }
}
