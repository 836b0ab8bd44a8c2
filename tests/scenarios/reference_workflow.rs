//! Test: the repository's Python package workflow end to end

use crate::helpers::*;
use ci_runner::core::{stage::StageKind, FailureKind, StepOutcome, StepState};
use ci_runner::execution::ExecutionEvent;

const JOB: &str = "build (3.8)";

/// Every stage passes on a clean tree
#[tokio::test]
async fn test_clean_tree_passes_every_stage() {
    let executor = MockExecutor::new();
    let result = run_workflow_with_mock(REFERENCE_WORKFLOW, executor.clone()).await;

    assert!(result.is_success(), "{:?}", result.run.state);
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.job_ids(), vec![JOB]);

    for step in [
        "Run actions/checkout@v2",
        "Set up Python 3.8",
        "Install dependencies",
        "Lint with flake8",
        "Test with pytest",
    ] {
        assert_step_succeeded(&result, JOB, step);
    }

    // Stages run strictly in declaration order
    let stages: Vec<StageKind> = result
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepStarted { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![
            StageKind::Checkout,
            StageKind::Setup,
            StageKind::Install,
            StageKind::StrictLint,
            StageKind::Test,
        ]
    );

    let scripts = executor.scripts();
    assert_eq!(scripts[0], "python3.8 --version");
    assert!(scripts[1].starts_with("python3.8 -m venv "));
    assert!(scripts[2].contains("pip install -r requirements.txt"));
    assert!(scripts[2].contains("-f https://download.pytorch.org/whl/torch_stable.html"));
    assert!(scripts[3].contains("flake8 . --count --select=E9,F63,F7,F82"));
    assert!(scripts[3].contains("--exit-zero"));
    assert!(scripts[4].contains("pytest --ignore=tests/image/ --ignore=tests/point/periodic_convolution_test.py"));
}

/// Later stages use the provisioned interpreter
#[tokio::test]
async fn test_later_stages_use_virtual_environment() {
    let executor = MockExecutor::new();
    let result = run_workflow_with_mock(REFERENCE_WORKFLOW, executor.clone()).await;
    assert!(result.is_success());

    let requests = executor.requests();
    let pytest = requests
        .iter()
        .find(|r| r.script.contains("pytest --ignore"))
        .expect("test stage should run");

    let venv = pytest.env.get("VIRTUAL_ENV").expect("VIRTUAL_ENV should be set");
    assert!(pytest.env["PATH"].starts_with(venv.as_str()));
    assert_eq!(pytest.env["CI"], "true");
    assert_eq!(pytest.env["GITHUB_REF"], "refs/heads/master");
    assert_eq!(pytest.env["GITHUB_EVENT_NAME"], "push");

    // The probe before provisioning did not see the venv
    assert!(!requests[0].env.contains_key("VIRTUAL_ENV"));
}

/// A strict lint defect fails the job and the test stage never runs
#[tokio::test]
async fn test_strict_lint_failure_skips_tests() {
    let executor = MockExecutor::new().on(
        "--select=E9,F63,F7,F82",
        1,
        "./e3nn/util.py:10:5: F821 undefined name 'torch'\n1",
    );
    let result = run_workflow_with_mock(REFERENCE_WORKFLOW, executor.clone()).await;

    assert!(!result.is_success());
    assert_eq!(result.exit_code(), 1);
    assert_step_failed(&result, JOB, "Lint with flake8", 1);
    assert_step_skipped(&result, JOB, "Test with pytest", "Lint with flake8");
    assert_job_failure(&result, JOB, FailureKind::StaticDefect, "Lint with flake8");

    assert!(!executor.scripts().iter().any(|s| s.contains("pytest --ignore")));
    assert_eq!(
        result.output_lines(JOB, "Lint with flake8"),
        vec!["./e3nn/util.py:10:5: F821 undefined name 'torch'", "1"]
    );
}

/// Findings of the lenient pass are reported but never fail the build
#[tokio::test]
async fn test_lenient_lint_findings_do_not_fail() {
    let executor = MockExecutor::new().on(
        "--exit-zero",
        0,
        "./e3nn/o3.py:120:1: C901 'wigner_D' is too complex (14)\n./e3nn/o3.py:40:5: E741 ambiguous variable name 'l'\n2",
    );
    let result = run_workflow_with_mock(REFERENCE_WORKFLOW, executor).await;

    assert!(result.is_success());
    assert_step_succeeded(&result, JOB, "Lint with flake8");
    assert_step_succeeded(&result, JOB, "Test with pytest");
    assert_eq!(result.output_lines(JOB, "Lint with flake8").len(), 3);
}

/// A failing test is reported with the test runner's exit code
#[tokio::test]
async fn test_test_failure_propagates_exit_code() {
    let executor = MockExecutor::new().on("pytest --ignore", 1, "FAILED tests/o3_test.py::test_wigner\n1 failed, 120 passed");
    let result = run_workflow_with_mock(REFERENCE_WORKFLOW, executor).await;

    assert_eq!(result.exit_code(), 1);
    assert_step_failed(&result, JOB, "Test with pytest", 1);
    assert_job_failure(&result, JOB, FailureKind::TestFailure, "Test with pytest");

    let failed = result.events.iter().find_map(|e| match e {
        ExecutionEvent::StepFailed { output, .. } => Some(output.clone()),
        _ => None,
    });
    assert!(failed.unwrap().contains("1 failed, 120 passed"));
}

/// An unresolvable dependency stops the job before any lint
#[tokio::test]
async fn test_install_failure_skips_lint_and_tests() {
    let executor = MockExecutor::new().on(
        "-r requirements.txt",
        1,
        "ERROR: No matching distribution found for torch-scatter==9.9",
    );
    let result = run_workflow_with_mock(REFERENCE_WORKFLOW, executor).await;

    assert_step_failed(&result, JOB, "Install dependencies", 1);
    assert_step_skipped(&result, JOB, "Lint with flake8", "Install dependencies");
    assert_step_skipped(&result, JOB, "Test with pytest", "Install dependencies");
    assert_job_failure(
        &result,
        JOB,
        FailureKind::DependencyResolution,
        "Install dependencies",
    );
}

/// No interpreter for the requested version fails provisioning
#[tokio::test]
async fn test_missing_interpreter_fails_provisioning() {
    let executor = MockExecutor::new().without_python();
    let result = run_workflow_with_mock(REFERENCE_WORKFLOW, executor.clone()).await;

    assert_eq!(result.exit_code(), 1);
    match result.step_state(JOB, "Set up Python 3.8") {
        StepState::Failed { error, .. } => {
            assert!(error.contains("Python 3.8 is not available"), "{}", error)
        }
        other => panic!("Expected failed setup, got {:?}", other),
    }
    assert_job_failure(&result, JOB, FailureKind::Provisioning, "Set up Python 3.8");
    assert_step_skipped(&result, JOB, "Install dependencies", "Set up Python 3.8");

    // Nothing but interpreter probes ran
    assert!(executor.scripts().iter().all(|s| s.ends_with("--version")));
}

/// Step completion events carry the outcome
#[tokio::test]
async fn test_completion_events() {
    let result = run_workflow_with_mock(REFERENCE_WORKFLOW, MockExecutor::new()).await;

    let completed = result
        .events
        .iter()
        .filter(|e| {
            matches!(
                e,
                ExecutionEvent::StepCompleted {
                    outcome: StepOutcome::Success,
                    ..
                }
            )
        })
        .count();
    assert_eq!(completed, 5);
    assert!(matches!(
        result.events.last(),
        Some(ExecutionEvent::RunCompleted { exit_code: 0, .. })
    ));
}
