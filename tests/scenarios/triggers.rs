//! Test: which events start a run

use crate::helpers::*;
use ci_runner::core::{config::WorkflowConfig, Event, EventKind, PlanError, PlanOptions, Workflow};

fn reference() -> Workflow {
    WorkflowConfig::from_yaml(REFERENCE_WORKFLOW)
        .unwrap()
        .to_workflow()
        .unwrap()
}

/// Pushes and pull requests targeting master start the workflow
#[test]
fn test_master_events_trigger() {
    let workflow = reference();
    for event in [Event::push("master"), Event::pull_request("refs/heads/master")] {
        let run = workflow.plan(&event, &PlanOptions::default()).unwrap();
        assert_eq!(run.jobs.len(), 1);
        assert_eq!(run.event.branch, "master");
    }
}

/// Other branches and other event kinds start nothing
#[test]
fn test_other_events_do_not_trigger() {
    let workflow = reference();
    let events = [
        Event::push("develop"),
        Event::pull_request("feature/o3"),
        Event::new(EventKind::WorkflowDispatch, "master"),
        Event::new(EventKind::Other("release".to_string()), "master"),
    ];
    for event in events {
        assert!(
            matches!(
                workflow.plan(&event, &PlanOptions::default()),
                Err(PlanError::NotTriggered { .. })
            ),
            "{:?} should not trigger",
            event
        );
    }
}

/// Branch globs and ignore lists
#[test]
fn test_branch_patterns() {
    let yaml = r#"
on:
  push:
    branches: ["release/**", main]
  pull_request:
    branches-ignore: ["docs/*"]
jobs:
  build:
    steps:
      - run: make
"#;
    let workflow = WorkflowConfig::from_yaml(yaml).unwrap().to_workflow().unwrap();
    let triggered = |event: Event| workflow.plan(&event, &PlanOptions::default()).is_ok();

    assert!(triggered(Event::push("main")));
    assert!(triggered(Event::push("release/1.0/rc")));
    assert!(!triggered(Event::push("feature")));
    assert!(triggered(Event::pull_request("feature")));
    assert!(!triggered(Event::pull_request("docs/readme")));
}

/// A run planned for an event executes with that event's context
#[tokio::test]
async fn test_pull_request_context() {
    let yaml = r#"
on: pull_request
jobs:
  build:
    steps:
      - run: echo ${{ github.event_name }} ${{ github.ref_name }}
"#;
    let mut run = WorkflowConfig::from_yaml(yaml)
        .unwrap()
        .to_workflow()
        .unwrap()
        .plan(&Event::pull_request("main"), &PlanOptions::default())
        .unwrap();

    let executor = MockExecutor::new();
    let result = run_planned(
        &mut run,
        executor.clone(),
        ci_runner::execution::SchedulingStrategy::Sequential,
    )
    .await;
    assert!(result.is_success());
    assert_eq!(executor.scripts(), vec!["echo pull_request main"]);
}
