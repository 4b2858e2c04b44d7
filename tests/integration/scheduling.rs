//! Integration tests for dependency scheduling and file locks.

use crate::fixtures::{id, task, writing, CoordinatorHarness, ScriptedBackend, TraceWorker};
use conductor::adapters::{Event, OfflineBackend, ToolCall};
use conductor::core::TaskError;
use conductor::error::StructuralError;
use conductor::{LockRegistry, Plan, RunStatus, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DELAY: Duration = Duration::from_millis(50);

/// Test: Diamond dependencies run in dependency order
///
/// Given T1 -> {T2, T3} -> T4
/// When the plan executes with 4 workers
/// Then T2 and T3 start after T1 ends, T4 starts after both, and all succeed
#[tokio::test(start_paused = true)]
async fn test_diamond_runs_in_dependency_order() {
    let worker = TraceWorker::new(DELAY);
    let harness = CoordinatorHarness::new(Arc::new(worker.clone()), 4);
    let plan = Plan::new(vec![
        task("T1", &[]),
        task("T2", &["T1"]),
        task("T3", &["T1"]),
        task("T4", &["T2", "T3"]),
    ]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    let (t1, t2, t3, t4) = (
        worker.span("T1"),
        worker.span("T2"),
        worker.span("T3"),
        worker.span("T4"),
    );
    assert!(t2.start >= t1.end);
    assert!(t3.start >= t1.end);
    assert!(t2.overlaps(&t3), "independent branches should run together");
    assert!(t4.start >= t2.end && t4.start >= t3.end);
}

/// Test: Tasks sharing a target file never overlap
///
/// Given T1 and T2 both writing a.txt, with no dependency between them
/// When the plan executes with 2 workers
/// Then T1 runs first and T2 starts only after T1 releases the lock
#[tokio::test(start_paused = true)]
async fn test_shared_file_is_mutually_exclusive() {
    let worker = TraceWorker::new(DELAY);
    let harness = CoordinatorHarness::new(Arc::new(worker.clone()), 2);
    let plan = Plan::new(vec![writing("T1", &["a.txt"]), writing("T2", &["a.txt"])]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    let (t1, t2) = (worker.span("T1"), worker.span("T2"));
    assert!(!t1.overlaps(&t2));
    assert!(t2.start >= t1.end);
    assert!(harness.coordinator.registry().is_empty());
}

/// Test: Disjoint files run concurrently
///
/// Given T1 writing a.txt and T2 writing b.txt
/// When the plan executes with 2 workers
/// Then both run at the same time
#[tokio::test(start_paused = true)]
async fn test_disjoint_files_run_concurrently() {
    let worker = TraceWorker::new(DELAY);
    let harness = CoordinatorHarness::new(Arc::new(worker.clone()), 2);
    let plan = Plan::new(vec![writing("T1", &["a.txt"]), writing("T2", &["b.txt"])]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(worker.span("T1").overlaps(&worker.span("T2")));
}

/// Test: Opposite lock orders do not deadlock
///
/// Given T1 writing {a.txt, b.txt} and T2 writing {b.txt, a.txt}
/// When the plan executes with 2 workers
/// Then both complete, one after the other
#[tokio::test(start_paused = true)]
async fn test_opposite_file_orders_complete() {
    let worker = TraceWorker::new(DELAY);
    let harness = CoordinatorHarness::new(Arc::new(worker.clone()), 2);
    let plan = Plan::new(vec![
        writing("T1", &["a.txt", "b.txt"]),
        writing("T2", &["b.txt", "a.txt"]),
    ]);

    let report = tokio::time::timeout(Duration::from_secs(10), harness.coordinator.execute(&plan))
        .await
        .expect("run should not deadlock");

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(!worker.span("T1").overlaps(&worker.span("T2")));
}

/// Test: Failure blocks every downstream task
///
/// Given T1 -> T2 -> T3 and an independent T4, with T1 failing
/// When the plan executes
/// Then T2 and T3 are blocked by T1, never run, and T4 still succeeds
#[tokio::test(start_paused = true)]
async fn test_failure_blocks_dependents_transitively() {
    let worker = TraceWorker::new(DELAY).failing(&["T1"]);
    let harness = CoordinatorHarness::new(Arc::new(worker.clone()), 2);
    let plan = Plan::new(vec![
        task("T1", &[]),
        task("T2", &["T1"]),
        task("T3", &["T2"]),
        task("T4", &[]),
    ]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert_eq!(report.succeeded(), vec![&id("T4")]);
    assert_eq!(report.failed().len(), 1);
    assert_eq!(
        report.blocked(),
        vec![(&id("T2"), &id("T1")), (&id("T3"), &id("T1"))]
    );
    let ran: Vec<String> = worker
        .spans()
        .into_iter()
        .map(|s| s.task_id.to_string())
        .collect();
    assert!(!ran.contains(&"T2".to_string()));
    assert!(!ran.contains(&"T3".to_string()));
}

/// Test: A dependency cycle aborts the run before dispatch
///
/// Given T1 <-> T2
/// When the plan executes
/// Then the report is Failed with a cycle error, no outcomes and nothing ran
#[tokio::test(start_paused = true)]
async fn test_cycle_is_rejected_before_dispatch() {
    let worker = TraceWorker::new(DELAY);
    let harness = CoordinatorHarness::new(Arc::new(worker.clone()), 2);
    let plan = Plan::new(vec![task("T1", &["T2"]), task("T2", &["T1"])]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.outcomes.is_empty());
    assert!(matches!(
        report.abort,
        Some(StructuralError::CycleDetected { .. })
    ));
    assert!(worker.spans().is_empty());
}

/// Test: Unknown dependencies are structural errors too
#[tokio::test(start_paused = true)]
async fn test_unknown_dependency_is_rejected() {
    let worker = TraceWorker::new(DELAY);
    let harness = CoordinatorHarness::new(Arc::new(worker.clone()), 2);
    let plan = Plan::new(vec![task("T1", &["T9"])]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert!(matches!(
        report.abort,
        Some(StructuralError::UnknownDependency { .. })
    ));
    assert!(worker.spans().is_empty());
}

/// Test: The pool never exceeds its capacity
///
/// Given 5 independent tasks
/// When the plan executes with 2 workers
/// Then at most 2 run at any instant and all succeed
#[tokio::test(start_paused = true)]
async fn test_capacity_limit_is_respected() {
    let worker = TraceWorker::new(DELAY);
    let harness = CoordinatorHarness::new(Arc::new(worker.clone()), 2);
    let plan = Plan::new((1..=5).map(|n| task(&format!("T{}", n), &[])).collect());

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.results.len(), 5);
    assert_eq!(worker.peak_concurrency(), 2);
}

/// Test: Coordinators sharing a registry exclude each other
///
/// Given two coordinators on one lock registry, each with a task writing shared.txt
/// When both plans execute concurrently
/// Then the two tasks never overlap and both succeed
#[tokio::test(start_paused = true)]
async fn test_shared_registry_across_runs() {
    let registry = LockRegistry::new();
    let worker = TraceWorker::new(DELAY);
    let first = CoordinatorHarness::new(Arc::new(worker.clone()), 2).share_registry(registry.clone());
    let second =
        CoordinatorHarness::new(Arc::new(worker.clone()), 2).share_registry(registry.clone());

    let plan_a = Plan::new(vec![writing("T1", &["shared.txt"])]);
    let plan_b = Plan::new(vec![writing("T1", &["shared.txt"])]);

    let (a, b) = tokio::join!(
        first.coordinator.execute(&plan_a),
        second.coordinator.execute(&plan_b)
    );

    assert_eq!(a.status, RunStatus::Succeeded);
    assert_eq!(b.status, RunStatus::Succeeded);
    let spans = worker.spans();
    assert_eq!(spans.len(), 2);
    assert!(!spans[0].overlaps(&spans[1]));
    assert!(registry.is_empty());
}

/// Test: Lifecycle events follow the run
///
/// Given a two-task chain with the second task failing
/// When the plan executes
/// Then events report start, completion, failure and the finished run in order
#[tokio::test(start_paused = true)]
async fn test_events_follow_the_run() {
    let worker = TraceWorker::new(DELAY).failing(&["T2"]);
    let mut harness = CoordinatorHarness::new(Arc::new(worker), 1);
    let plan = Plan::new(vec![task("T1", &[]), task("T2", &["T1"]), task("T3", &["T2"])]);

    let report = harness.coordinator.execute(&plan).await;
    let events = harness.drain_events();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    let names: Vec<String> = events
        .iter()
        .map(|e| match e {
            Event::TaskStarted { task_id, .. } => format!("started {}", task_id),
            Event::TaskCompleted { task_id, .. } => format!("completed {}", task_id),
            Event::TaskFailed { task_id, .. } => format!("failed {}", task_id),
            Event::TaskBlocked { task_id, by, .. } => format!("blocked {} by {}", task_id, by),
            Event::RunFinished { status, .. } => format!("finished {}", status),
            other => format!("{:?}", other),
        })
        .collect();
    assert_eq!(
        names,
        vec![
            "started T1",
            "completed T1",
            "started T2",
            "failed T2",
            "blocked T3 by T2",
            "finished partially succeeded",
        ]
    );
}

/// Test: The status board reflects the finished run
#[tokio::test(start_paused = true)]
async fn test_status_board_after_run() {
    let worker = TraceWorker::new(DELAY).failing(&["T1"]);
    let harness = CoordinatorHarness::new(Arc::new(worker), 2);
    let plan = Plan::new(vec![task("T1", &[]), task("T2", &["T1"])]);

    harness.coordinator.execute(&plan).await;

    let board = harness.coordinator.status(&plan.id).await.unwrap();
    assert!(matches!(board[&id("T1")], TaskStatus::Failed { .. }));
    assert_eq!(board[&id("T2")], TaskStatus::Blocked { by: id("T1") });
}

fn sleep_call(secs: &str) -> ToolCall {
    ToolCall::ExecuteCommand {
        command: format!("sleep {}", secs),
        timeout_secs: None,
    }
}

fn write_call(path: &str, content: &str) -> ToolCall {
    ToolCall::WriteFile {
        path: path.to_string(),
        content: content.to_string(),
    }
}

/// Test: A write outside the declared target files is refused
///
/// Given T1 declaring no files but writing b.txt, and T2 declaring and writing b.txt
/// When both run at the same time
/// Then T1 fails before touching b.txt and only T2's content lands
#[tokio::test]
async fn test_undeclared_write_cannot_bypass_locks() {
    let harness = CoordinatorHarness::with_tools(Arc::new(OfflineBackend), Duration::from_secs(10));
    let plan = Plan::new(vec![
        task("T1", &[])
            .with_tool_call(write_call("b.txt", "from T1"))
            .with_tool_call(sleep_call("0.3")),
        writing("T2", &["b.txt"])
            .with_tool_call(sleep_call("0.1"))
            .with_tool_call(write_call("b.txt", "from T2")),
    ]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    let t1 = report.result(&id("T1")).unwrap();
    assert_eq!(
        t1.error,
        Some(TaskError::UndeclaredWrite {
            path: "b.txt".to_string()
        })
    );
    assert!(t1.modified_paths.is_empty());
    assert_eq!(harness.read("b.txt"), "from T2");
}

/// Test: Planned writes are locked even when not listed as targets
///
/// Given a planner response where T1 lists no target files but writes b.txt,
///   and T2 targets and writes b.txt
/// When the plan is decoded and executed with 2 workers
/// Then T1 holds the b.txt lock, so the two tasks run one after the other
#[tokio::test]
async fn test_planned_writes_are_locked() {
    let response = r#"[
        {"id": "T1", "description": "first writer",
         "tool_calls": [{"tool": "write_file", "path": "b.txt", "content": "from T1"},
                        {"tool": "execute_command", "command": "sleep 0.3"}]},
        {"id": "T2", "description": "second writer", "target_files": ["b.txt"],
         "tool_calls": [{"tool": "execute_command", "command": "sleep 0.1"},
                        {"tool": "write_file", "path": "b.txt", "content": "from T2"}]}
    ]"#;
    let mut harness = CoordinatorHarness::with_tools(
        Arc::new(ScriptedBackend::replying(response)),
        Duration::from_secs(10),
    );

    let plan = harness.coordinator.plan("Write b.txt twice").await;
    assert!(plan
        .task(&id("T1"))
        .unwrap()
        .target_files
        .contains(&PathBuf::from("b.txt")));
    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(harness.read("b.txt"), "from T2");
    let order: Vec<String> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            Event::TaskStarted { task_id, .. } => Some(format!("started {}", task_id)),
            Event::TaskCompleted { task_id, .. } => Some(format!("completed {}", task_id)),
            _ => None,
        })
        .collect();
    assert_eq!(
        order,
        vec!["started T1", "completed T1", "started T2", "completed T2"]
    );
}
