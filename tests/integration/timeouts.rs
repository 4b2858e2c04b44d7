//! Integration tests for tool and task timeouts.

use crate::fixtures::{id, task, writing, CoordinatorHarness, TraceWorker};
use conductor::adapters::{OfflineBackend, ToolCall};
use conductor::core::TaskError;
use conductor::orchestration::Worker;
use conductor::{Plan, RunStatus, TaskStatus};
use std::sync::Arc;
use std::time::Duration;

/// Test: A slow command times out without stalling the run
///
/// Given T1 running `sleep 5` on a.txt with a 100ms call timeout,
///   T2 depending on T1, and T3 writing a.txt independently
/// When the plan executes
/// Then T1 fails with a timeout, T2 is blocked, and T3 gets the lock and succeeds
#[tokio::test]
async fn test_command_timeout_releases_locks() {
    let harness =
        CoordinatorHarness::with_tools(Arc::new(OfflineBackend), Duration::from_millis(100));
    let plan = Plan::new(vec![
        writing("T1", &["a.txt"]).with_tool_call(ToolCall::ExecuteCommand {
            command: "sleep 5".to_string(),
            timeout_secs: None,
        }),
        task("T2", &["T1"]),
        writing("T3", &["a.txt"])
            .with_tool_call(ToolCall::WriteFile {
                path: "a.txt".to_string(),
                content: "after timeout\n".to_string(),
            })
            .with_criterion("file `a.txt` contains \"after timeout\""),
    ]);

    let started = std::time::Instant::now();
    let report = harness.coordinator.execute(&plan).await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert_eq!(
        report.result(&id("T1")).unwrap().error,
        Some(TaskError::Timeout { millis: 100 })
    );
    assert_eq!(
        report.outcome(&id("T2")),
        Some(&TaskStatus::Blocked { by: id("T1") })
    );
    assert!(report.result(&id("T3")).unwrap().is_success());
    assert_eq!(harness.read("a.txt"), "after timeout\n");
    assert!(harness.coordinator.registry().is_empty());
}

/// Test: A hung worker is cut off by the pool timeout
///
/// Given a worker that never finishes within the 100ms task timeout
/// When a two-task chain executes
/// Then the first task fails with a timeout, the second is blocked and no lock is left
#[tokio::test(start_paused = true)]
async fn test_hung_worker_hits_task_timeout() {
    let harness = CoordinatorHarness::build(
        Arc::new(OfflineBackend),
        |_| Arc::new(TraceWorker::new(Duration::from_secs(3600))) as Arc<dyn Worker>,
        2,
        Duration::from_millis(100),
    );
    let plan = Plan::new(vec![writing("T1", &["x.txt"]), task("T2", &["T1"])]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.result(&id("T1")).unwrap().error,
        Some(TaskError::Timeout { millis: 100 })
    );
    assert_eq!(report.blocked(), vec![(&id("T2"), &id("T1"))]);
    assert!(harness.coordinator.registry().is_empty());
}

/// Test: A per-call timeout hint shorter than the default wins
#[tokio::test]
async fn test_call_timeout_hint_is_honoured() {
    let harness = CoordinatorHarness::with_tools(Arc::new(OfflineBackend), Duration::from_secs(30));
    let plan = Plan::new(vec![task("T1", &[]).with_tool_call(ToolCall::ExecuteCommand {
        command: "sleep 5".to_string(),
        timeout_secs: Some(1),
    })]);

    let report = harness.coordinator.execute(&plan).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.result(&id("T1")).unwrap().error,
        Some(TaskError::Timeout { millis: 1000 })
    );
}
