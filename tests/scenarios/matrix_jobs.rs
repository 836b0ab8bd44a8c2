//! Test: matrix expansion and job independence

use crate::helpers::*;
use ci_runner::core::{Event, ExecutionStatus, FailureKind, PlanOptions};
use ci_runner::core::config::WorkflowConfig;
use ci_runner::execution::SchedulingStrategy;
use std::time::Duration;

const VERSIONS: &str = r#"
name: versions
on: push
jobs:
  test:
    strategy:
      matrix:
        python-version: ["3.7", "3.8", "3.9"]
    steps:
      - uses: actions/setup-python@v2
        with:
          python-version: ${{ matrix.python-version }}
      - name: Test
        run: pytest --junitxml=report-${{ matrix.python-version }}.xml
"#;

/// One job per matrix entry, each provisioned with its own interpreter
#[tokio::test]
async fn test_one_job_per_matrix_entry() {
    let executor = MockExecutor::new();
    let result = run_workflow_with_mock(VERSIONS, executor.clone()).await;

    assert!(result.is_success());
    assert_eq!(result.job_ids(), vec!["test (3.7)", "test (3.8)", "test (3.9)"]);

    let scripts = executor.scripts();
    for version in ["3.7", "3.8", "3.9"] {
        assert!(scripts.contains(&format!("python{} --version", version)));
        assert!(scripts.contains(&format!("pytest --junitxml=report-{}.xml", version)));
    }
}

/// A failing matrix job does not stop its siblings
#[tokio::test]
async fn test_matrix_jobs_fail_independently() {
    let executor = MockExecutor::new().on("report-3.8.xml", 1, "1 failed");
    let result = run_workflow_with_mock(VERSIONS, executor).await;

    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.job("test (3.7)").state.status, ExecutionStatus::Completed);
    assert_eq!(result.job("test (3.8)").state.status, ExecutionStatus::Failed);
    assert_eq!(result.job("test (3.9)").state.status, ExecutionStatus::Completed);
    assert_eq!(result.run.state.completed_jobs, 2);
    assert_eq!(result.run.state.failed_jobs, 1);
}

/// The first failed job in plan order decides the run's exit code
#[tokio::test]
async fn test_run_exit_code_follows_plan_order() {
    let executor = MockExecutor::new()
        .on("report-3.7.xml", 5, "")
        .on("report-3.9.xml", 3, "");
    let result = run_workflow_with_mock(VERSIONS, executor).await;

    assert_eq!(result.exit_code(), 5);
    assert_eq!(result.job("test (3.9)").state.exit_code, 3);
}

const FAIL_FAST: &str = r#"
on: push
jobs:
  test:
    strategy:
      fail-fast: true
      matrix:
        mode: [broken, slow]
    steps:
      - run: check-${{ matrix.mode }}
      - run: echo after
"#;

/// fail-fast cancels the rest of the matrix once one job fails
#[tokio::test]
async fn test_fail_fast_cancels_siblings() {
    let executor = MockExecutor::new()
        .on("check-broken", 4, "")
        .slow("check-slow", Duration::from_secs(10));
    let result = run_workflow_with_mock(FAIL_FAST, executor).await;

    assert_eq!(result.exit_code(), 4);
    assert_eq!(result.job("test (broken)").state.status, ExecutionStatus::Failed);

    let slow = result.job("test (slow)");
    assert_eq!(slow.state.status, ExecutionStatus::Cancelled);
    assert_eq!(slow.state.failure.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert_step_skipped(&result, "test (slow)", "Run echo after", "cancelled");
    assert!(result.duration_ms < 10_000);
}

/// Without fail-fast the sibling finishes
#[tokio::test]
async fn test_without_fail_fast_siblings_finish() {
    let yaml = FAIL_FAST.replace("fail-fast: true", "fail-fast: false");
    let executor = MockExecutor::new()
        .on("check-broken", 4, "")
        .slow("check-slow", Duration::from_millis(50));
    let result = run_workflow_with_mock(&yaml, executor).await;

    assert_eq!(result.exit_code(), 4);
    assert_eq!(result.job("test (slow)").state.status, ExecutionStatus::Completed);
}

/// max-parallel caps concurrent matrix jobs
#[tokio::test]
async fn test_max_parallel_limits_concurrency() {
    let yaml = r#"
on: push
jobs:
  test:
    strategy:
      max-parallel: 1
      matrix:
        shard: [1, 2, 3]
    steps:
      - run: sleep-shard ${{ matrix.shard }}
"#;
    let executor = MockExecutor::new().slow("sleep-shard", Duration::from_millis(30));
    let result = run_workflow_with_strategy(yaml, executor.clone(), SchedulingStrategy::Parallel).await;

    assert!(result.is_success());
    assert_eq!(executor.peak_concurrency(), 1);
}

/// Parallel strategy runs matrix jobs at the same time
#[tokio::test]
async fn test_parallel_jobs_overlap() {
    let yaml = r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        shard: [1, 2, 3]
    steps:
      - run: sleep-shard ${{ matrix.shard }}
"#;
    let executor = MockExecutor::new().slow("sleep-shard", Duration::from_millis(100));
    let result = run_workflow_with_strategy(yaml, executor.clone(), SchedulingStrategy::Parallel).await;

    assert!(result.is_success());
    assert_eq!(executor.peak_concurrency(), 3);
}

/// include and exclude shape the matrix before jobs are planned
#[tokio::test]
async fn test_include_and_exclude() {
    let yaml = r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [ubuntu, macos]
        python-version: ["3.8", "3.9"]
        exclude:
          - os: macos
            python-version: "3.8"
        include:
          - os: ubuntu
            python-version: "3.10"
    steps:
      - run: echo ${{ matrix.os }} ${{ matrix.python-version }}
"#;
    let executor = MockExecutor::new();
    let result = run_workflow_with_strategy(yaml, executor.clone(), SchedulingStrategy::Sequential).await;

    assert!(result.is_success());
    assert_eq!(result.run.jobs.len(), 4);
    assert_eq!(
        executor.scripts(),
        vec!["echo ubuntu 3.8", "echo ubuntu 3.9", "echo macos 3.9", "echo ubuntu 3.10"]
    );
}

/// A single matrix cell can be selected
#[tokio::test]
async fn test_matrix_selection() {
    let workflow = WorkflowConfig::from_yaml(VERSIONS).unwrap().to_workflow().unwrap();
    let options = PlanOptions {
        matrix: vec![("python-version".to_string(), "3.9".to_string())],
        ..PlanOptions::default()
    };
    let mut run = workflow.plan(&Event::push("master"), &options).unwrap();

    let executor = MockExecutor::new();
    let result = run_planned(&mut run, executor.clone(), SchedulingStrategy::Parallel).await;
    assert_eq!(result.job_ids(), vec!["test (3.9)"]);
    assert!(!executor.scripts().iter().any(|s| s.contains("3.7")));
}
