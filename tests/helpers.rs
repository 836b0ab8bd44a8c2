//! Test utilities for ci-runner

use async_trait::async_trait;
use ci_runner::core::{
    config::WorkflowConfig, Event, ExecutionStatus, FailureKind, Job, PlanOptions, StepOutcome,
    StepState, WorkflowRun,
};
use ci_runner::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use ci_runner::runner::{
    CommandExecutor, CommandOutput, CommandRequest, OutputCallback, OutputStream, RunnerError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The workflow file shipped with the repository
pub const REFERENCE_WORKFLOW: &str = include_str!("../workflows/python-package.yml");

/// Scripted answer for commands whose script contains a pattern
#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    exit_code: i32,
    output: String,
    delay: Option<Duration>,
}

/// Mock command executor that answers from predefined rules
///
/// Rules are matched in insertion order against the whole script; a script
/// without a matching rule succeeds with no output. Interpreter probes
/// (`pythonX.Y --version`) report the version in the binary name.
#[derive(Debug, Clone)]
pub struct MockExecutor {
    rules: Arc<Vec<Rule>>,
    python: Option<String>,
    requests: Arc<Mutex<Vec<CommandRequest>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(Vec::new()),
            python: Some("3.8.10".to_string()),
            requests: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer scripts containing `pattern` with an exit code and output
    pub fn on(mut self, pattern: &str, exit_code: i32, output: &str) -> Self {
        Arc::make_mut(&mut self.rules).push(Rule {
            pattern: pattern.to_string(),
            exit_code,
            output: output.to_string(),
            delay: None,
        });
        self
    }

    /// Succeed for scripts containing `pattern` after a delay
    pub fn slow(mut self, pattern: &str, delay: Duration) -> Self {
        Arc::make_mut(&mut self.rules).push(Rule {
            pattern: pattern.to_string(),
            exit_code: 0,
            output: String::new(),
            delay: Some(delay),
        });
        self
    }

    /// Simulate a runner without any Python interpreter
    pub fn without_python(mut self) -> Self {
        self.python = None;
        self
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.script).collect()
    }

    /// Highest number of commands that ran at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn version_probe(&self, script: &str) -> Option<CommandOutput> {
        let binary = script.strip_suffix(" --version")?;
        let default = self.python.as_ref()?;
        let version = match binary.strip_prefix("python") {
            Some("") | Some("3") => default.clone(),
            Some(v) if v.contains('.') => format!("{}.0", v),
            _ => return Some(CommandOutput::new(127, "")),
        };
        Some(CommandOutput::new(0, format!("Python {}\n", version)))
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the running counter when a command ends or is cancelled
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(
        &self,
        request: &CommandRequest,
        callback: Option<&dyn OutputCallback>,
    ) -> Result<CommandOutput, RunnerError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(output) = self.version_probe(&request.script) {
            return Ok(output);
        }
        if request.script.strip_suffix(" --version").is_some() && self.python.is_none() {
            return Ok(CommandOutput::new(127, ""));
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(self.running.clone());

        let rule = self
            .rules
            .iter()
            .find(|rule| request.script.contains(&rule.pattern))
            .cloned();

        let (exit_code, output) = match rule {
            Some(rule) => {
                if let Some(delay) = rule.delay {
                    tokio::time::sleep(delay).await;
                }
                (rule.exit_code, rule.output)
            }
            None => {
                tokio::task::yield_now().await;
                (0, String::new())
            }
        };

        if let Some(cb) = callback {
            for line in output.lines() {
                cb.on_line(OutputStream::Stdout, line);
            }
        }

        Ok(CommandOutput::new(exit_code, output))
    }
}

/// Plan a workflow for an event with default options
pub fn plan(yaml: &str, event: &Event) -> WorkflowRun {
    WorkflowConfig::from_yaml(yaml)
        .expect("workflow should parse")
        .to_workflow()
        .expect("workflow should compile")
        .plan(event, &PlanOptions::default())
        .expect("event should trigger the workflow")
}

/// Run a workflow for a push to master with a mock executor
pub async fn run_workflow_with_mock(yaml: &str, executor: MockExecutor) -> WorkflowTestResult {
    run_workflow_with_strategy(yaml, executor, SchedulingStrategy::Parallel).await
}

/// Run a workflow with a specific scheduling strategy
pub async fn run_workflow_with_strategy(
    yaml: &str,
    executor: MockExecutor,
    strategy: SchedulingStrategy,
) -> WorkflowTestResult {
    let mut run = plan(yaml, &Event::push("master"));
    run_planned(&mut run, executor, strategy).await
}

/// Execute an already planned run
pub async fn run_planned<E: CommandExecutor + 'static>(
    run: &mut WorkflowRun,
    executor: E,
    strategy: SchedulingStrategy,
) -> WorkflowTestResult {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let engine = ExecutionEngine::new(executor, strategy);
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let start = std::time::Instant::now();
    engine.execute(run).await.expect("engine should not error");
    let duration = start.elapsed();

    let events = events.lock().unwrap().clone();
    WorkflowTestResult {
        run: run.clone(),
        events,
        duration_ms: duration.as_millis() as u64,
    }
}

/// Test result from running a workflow
#[derive(Debug, Clone)]
pub struct WorkflowTestResult {
    pub run: WorkflowRun,
    pub events: Vec<ExecutionEvent>,
    pub duration_ms: u64,
}

impl WorkflowTestResult {
    pub fn is_success(&self) -> bool {
        self.run.state.status == ExecutionStatus::Completed
    }

    pub fn exit_code(&self) -> i32 {
        self.run.state.exit_code
    }

    pub fn job(&self, id: &str) -> &Job {
        self.run
            .job(id)
            .unwrap_or_else(|| panic!("Job '{}' not found in {:?}", id, self.job_ids()))
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.run.jobs.iter().map(|j| j.id.clone()).collect()
    }

    /// Get the state of a step of a job
    pub fn step_state(&self, job: &str, step: &str) -> &StepState {
        &self
            .job(job)
            .step(step)
            .unwrap_or_else(|| panic!("Step '{}' not found in job '{}'", step, job))
            .state
    }

    /// Lines streamed for a step
    pub fn output_lines(&self, job: &str, step: &str) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::StepOutput {
                    job_id,
                    step_name,
                    line,
                    ..
                } if job_id == job && step_name == step => Some(line.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Assert a step ran and exited with 0
pub fn assert_step_succeeded(result: &WorkflowTestResult, job: &str, step: &str) {
    let state = result.step_state(job, step);
    assert!(
        matches!(
            state,
            StepState::Completed {
                outcome: StepOutcome::Success,
                ..
            }
        ),
        "Step '{}' should have succeeded, but was in state: {:?}",
        step,
        state
    );
}

/// Assert a step failed the job with the given exit code
pub fn assert_step_failed(result: &WorkflowTestResult, job: &str, step: &str, exit_code: i32) {
    match result.step_state(job, step) {
        StepState::Failed { exit_code: code, .. } => assert_eq!(
            *code, exit_code,
            "Step '{}' failed with exit code {}, expected {}",
            step, code, exit_code
        ),
        other => panic!("Step '{}' should have failed, but was in state: {:?}", step, other),
    }
}

/// Assert a step never ran, with a reason mentioning `reason`
pub fn assert_step_skipped(result: &WorkflowTestResult, job: &str, step: &str, reason: &str) {
    match result.step_state(job, step) {
        StepState::Skipped { reason: actual } => assert!(
            actual.contains(reason),
            "Step '{}' skipped because '{}', expected mention of '{}'",
            step,
            actual,
            reason
        ),
        other => panic!("Step '{}' should have been skipped, but was in state: {:?}", step, other),
    }
}

/// Assert the failure recorded for a job
pub fn assert_job_failure(result: &WorkflowTestResult, job: &str, kind: FailureKind, step: &str) {
    let failure = result
        .job(job)
        .state
        .failure
        .as_ref()
        .unwrap_or_else(|| panic!("Job '{}' should have failed", job));
    assert_eq!(failure.kind, kind, "unexpected failure kind for job '{}'", job);
    assert_eq!(failure.step, step, "unexpected failing step for job '{}'", job);
}
