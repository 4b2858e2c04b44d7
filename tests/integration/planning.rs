//! Integration tests for planning and end-to-end runs with real tools.

use crate::fixtures::{id, CoordinatorHarness, ScriptedBackend};
use conductor::adapters::{BackendError, Event, OfflineBackend};
use conductor::core::{FallbackReason, TaskError};
use conductor::orchestration::ADDRESSED_CRITERION;
use conductor::{Planner, RunStatus, Workspace};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const HELLO_REQUEST: &str = "Create hello.py with a print statement";

/// Test: Plans wrapped in prose and code fences are decoded
///
/// Given a backend answering with commentary around a fenced JSON task list
/// When the planner plans a request
/// Then the tasks are decoded and the plan is not a fallback
#[tokio::test]
async fn test_prose_wrapped_plan_is_decoded() {
    let response = "Sure! Here is the plan:\n\n```json\n[\n  {\"id\": \"T1\", \"description\": \"Write the module\", \"target_files\": [\"./src/util.py\"]},\n  {\"id\": \"T2\", \"description\": \"Test it\", \"dependencies\": [\"T1\"], \"success_criteria\": [\"the command `true` succeeds\"]}\n]\n```\n\nLet me know if you need changes.";
    let backend = Arc::new(ScriptedBackend::replying(response));
    let planner = Planner::new(backend.clone(), Workspace::new("/work"));

    let plan = planner.plan("Add a util module with tests", 10).await;

    assert!(!plan.is_fallback());
    assert_eq!(plan.len(), 2);
    let t1 = plan.task(&id("T1")).unwrap();
    assert!(t1.target_files.contains(&PathBuf::from("src/util.py")));
    let t2 = plan.task(&id("T2")).unwrap();
    assert!(t2.dependencies.contains(&id("T1")));
    assert_eq!(backend.calls(), 1);
}

/// Test: Invalid JSON degrades to the fallback plan
///
/// Given a backend answering with malformed JSON
/// When the planner plans "Create hello.py with a print statement"
/// Then one fallback task targets hello.py and requires it to exist
#[tokio::test]
async fn test_invalid_json_falls_back() {
    let backend = Arc::new(ScriptedBackend::replying("[{\"id\": \"T1\", \"description\": "));
    let planner = Planner::new(backend, Workspace::new("/work"));

    let plan = planner.plan(HELLO_REQUEST, 10).await;

    assert!(matches!(plan.fallback, Some(FallbackReason::Malformed(_))));
    assert_eq!(plan.len(), 1);
    let task = &plan.tasks[0];
    assert_eq!(task.description, HELLO_REQUEST);
    assert!(task.target_files.contains(&PathBuf::from("hello.py")));
    assert_eq!(
        task.success_criteria,
        vec!["file `hello.py` exists".to_string(), ADDRESSED_CRITERION.to_string()]
    );
}

/// Test: Fallback plans depend only on the request
///
/// Given an offline backend
/// When the same request is planned twice
/// Then the task lists are identical and the plan ids differ
#[tokio::test]
async fn test_fallback_is_deterministic() {
    let planner = Planner::new(Arc::new(OfflineBackend), Workspace::new("/work"));

    let first = planner.plan(HELLO_REQUEST, 10).await;
    let second = planner.plan(HELLO_REQUEST, 10).await;

    assert_eq!(
        serde_json::to_value(&first.tasks).unwrap(),
        serde_json::to_value(&second.tasks).unwrap()
    );
    assert_ne!(first.id, second.id);
    assert_eq!(
        first.fallback,
        Some(FallbackReason::Backend(BackendError::Unavailable))
    );
}

/// Test: Auth failures are not retried
#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let backend = Arc::new(ScriptedBackend::failing(BackendError::AuthFailure));
    let planner = Planner::new(backend.clone(), Workspace::new("/work"))
        .with_retries(3)
        .with_retry_delay(Duration::from_millis(1));

    let plan = planner.plan(HELLO_REQUEST, 10).await;

    assert_eq!(
        plan.fallback,
        Some(FallbackReason::Backend(BackendError::AuthFailure))
    );
    assert_eq!(backend.calls(), 1);
}

/// Test: A planned write runs end to end
///
/// Given a backend planning one task with an explicit write_file call
/// When the coordinator plans and executes the request
/// Then hello.py is written, verification passes and the run succeeds
#[tokio::test]
async fn test_planned_write_runs_end_to_end() {
    let response = r#"{"tasks": [{
        "id": "T1",
        "description": "Create hello.py",
        "target_files": ["hello.py"],
        "success_criteria": ["file `hello.py` exists", "file `hello.py` contains \"print\""],
        "tool_calls": [{"tool": "write_file", "path": "hello.py", "content": "print('hello')\n"}]
    }]}"#;
    let mut harness = CoordinatorHarness::with_tools(
        Arc::new(ScriptedBackend::replying(response)),
        Duration::from_secs(10),
    );

    let plan = harness.coordinator.plan(HELLO_REQUEST).await;
    assert!(!plan.is_fallback());
    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(harness.read("hello.py"), "print('hello')\n");
    assert!(harness.workspace.absolute("hello.py").unwrap().is_file());
    let result = report.result(&id("T1")).unwrap();
    assert_eq!(result.modified_paths, vec![PathBuf::from("hello.py")]);

    let events = harness.drain_events();
    assert!(matches!(
        events.first(),
        Some(Event::PlanningAttempt { attempt: 1, error: None })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::PlanCreated { task_count: 1, fallback: None, .. })));
    assert!(matches!(events.last(), Some(Event::RunFinished { .. })));
}

/// Test: An offline fallback run reports the unmet criterion
///
/// Given an offline backend and an empty workspace
/// When "Create hello.py with a print statement" is planned and executed
/// Then the fallback task fails verification on hello.py and nothing is written
#[tokio::test]
async fn test_offline_fallback_fails_verification() {
    let harness = CoordinatorHarness::with_tools(Arc::new(OfflineBackend), Duration::from_secs(10));

    let plan = harness.coordinator.plan(HELLO_REQUEST).await;
    assert!(plan.is_fallback());
    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Failed);
    let result = report.result(&id("T1")).unwrap();
    assert_eq!(
        result.error,
        Some(TaskError::Verification {
            criterion: "file `hello.py` exists".to_string()
        })
    );
    assert!(!harness.dir.path().join("hello.py").exists());
}

/// Test: Commands planned by the backend run in the workspace
#[tokio::test]
async fn test_planned_command_and_output_check() {
    let response = r#"[
        {"id": "T1", "description": "Seed data", "target_files": ["data/input.txt"],
         "tool_calls": [{"tool": "write_file", "path": "data/input.txt", "content": "alpha\nbeta\n"}]},
        {"id": "T2", "description": "Count lines", "dependencies": ["T1"],
         "success_criteria": ["the command `wc -l < data/input.txt` outputs \"2\""],
         "tool_calls": [{"tool": "execute_command", "command": "cat data/input.txt"}]}
    ]"#;
    let harness = CoordinatorHarness::with_tools(
        Arc::new(ScriptedBackend::replying(response)),
        Duration::from_secs(10),
    );

    let plan = harness.coordinator.plan("Seed data and count it").await;
    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    let t2 = report.result(&id("T2")).unwrap();
    assert!(t2.stdout_excerpt.contains("alpha"));
}
