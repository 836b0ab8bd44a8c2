//! Test: step failure handling within a job

use crate::helpers::*;
use ci_runner::core::{FailureKind, StepOutcome, StepState};
use ci_runner::execution::SchedulingStrategy;

/// A step allowed to fail records its outcome and the job goes on
#[tokio::test]
async fn test_continue_on_error() {
    let yaml = r#"
name: allowed failure
on: push
jobs:
  check:
    steps:
      - name: Type check
        continue-on-error: true
        run: mypy src
      - name: Test
        run: pytest
"#;
    let executor = MockExecutor::new().on("mypy", 2, "src/a.py:1: error: Missing return");
    let result = run_workflow_with_mock(yaml, executor).await;

    assert!(result.is_success());
    assert_eq!(result.exit_code(), 0);
    match result.step_state("check", "Type check") {
        StepState::Completed {
            exit_code, outcome, ..
        } => {
            assert_eq!(*exit_code, 2);
            assert_eq!(*outcome, StepOutcome::Failure);
        }
        other => panic!("Expected completed step, got {:?}", other),
    }
    assert_step_succeeded(&result, "check", "Test");
}

/// Native exit codes of the first failing step become the job's exit code
#[tokio::test]
async fn test_first_failure_sets_exit_code() {
    let yaml = r#"
on: push
jobs:
  build:
    steps:
      - name: Compile
        run: make
      - name: Package
        run: make dist
      - name: Publish
        run: twine upload dist/*
"#;
    let executor = MockExecutor::new().on("make dist", 42, "");
    let result = run_workflow_with_mock(yaml, executor.clone()).await;

    assert_eq!(result.exit_code(), 42);
    assert_step_succeeded(&result, "build", "Compile");
    assert_step_failed(&result, "build", "Package", 42);
    assert_step_skipped(&result, "build", "Publish", "step 'Package' failed");
    assert_job_failure(&result, "build", FailureKind::Command, "Package");
    assert_eq!(executor.scripts(), vec!["make", "make dist"]);
}

/// Unknown actions fail instead of being ignored
#[tokio::test]
async fn test_unsupported_action_fails_step() {
    let yaml = r#"
on: push
jobs:
  build:
    steps:
      - uses: actions/cache@v3
        with:
          path: ~/.cache/pip
      - run: pytest
"#;
    let result = run_workflow_with_mock(yaml, MockExecutor::new()).await;

    assert_eq!(result.exit_code(), 1);
    match result.step_state("build", "Run actions/cache@v3") {
        StepState::Failed { error, .. } => assert!(error.contains("unsupported action")),
        other => panic!("Expected failure, got {:?}", other),
    }
    assert_step_skipped(&result, "build", "Run pytest", "Run actions/cache@v3");
}

/// Step env and working directory reach the command
#[tokio::test]
async fn test_step_environment() {
    let yaml = r#"
on: push
env:
  PYTHONHASHSEED: "0"
jobs:
  build:
    env:
      TORCH_HOME: /tmp/torch
    steps:
      - name: Docs
        working-directory: docs
        env:
          SPHINXOPTS: -W
        run: make html
"#;
    let executor = MockExecutor::new();
    let result = run_workflow_with_strategy(yaml, executor.clone(), SchedulingStrategy::Sequential).await;
    assert!(result.is_success());

    let request = &executor.requests()[0];
    assert_eq!(request.env["PYTHONHASHSEED"], "0");
    assert_eq!(request.env["TORCH_HOME"], "/tmp/torch");
    assert_eq!(request.env["SPHINXOPTS"], "-W");
    assert!(request.workdir.ends_with("docs"));
}
