//! Worker results and the per-run execution report.

use crate::adapters::ToolError;
use crate::core::plan::{Plan, PlanId};
use crate::core::task::{TaskId, TaskStatus};
use crate::core::workspace::PathEscape;
use crate::error::StructuralError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Typed cause of a task-local failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskError {
    #[error("tool {tool} failed: {error}")]
    Tool { tool: String, error: ToolError },

    #[error("timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error(transparent)]
    PathEscape(#[from] PathEscape),

    /// A write to a path the task did not declare, and so does not hold a lock on.
    #[error("write to {path} is outside the task's target files")]
    UndeclaredWrite { path: String },

    #[error("unmet success criterion: {criterion}")]
    Verification { criterion: String },

    #[error("worker crashed: {message}")]
    Crashed { message: String },
}

impl TaskError {
    pub fn timeout(after: std::time::Duration) -> Self {
        TaskError::Timeout {
            millis: after.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Succeeded,
    Failed,
}

/// What a worker reports for one task. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: TaskId,
    pub status: WorkerStatus,
    pub modified_paths: Vec<PathBuf>,
    pub stdout_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl WorkerResult {
    pub fn succeeded(task_id: TaskId, modified_paths: Vec<PathBuf>, stdout_excerpt: String) -> Self {
        Self {
            task_id,
            status: WorkerStatus::Succeeded,
            modified_paths,
            stdout_excerpt,
            error: None,
        }
    }

    pub fn failed(task_id: TaskId, error: TaskError) -> Self {
        Self {
            task_id,
            status: WorkerStatus::Failed,
            modified_paths: Vec::new(),
            stdout_excerpt: String::new(),
            error: Some(error),
        }
    }

    /// Attach the effects that were committed before the failure.
    pub fn with_partial_effects(mut self, modified_paths: Vec<PathBuf>, stdout_excerpt: String) -> Self {
        self.modified_paths = modified_paths;
        self.stdout_excerpt = stdout_excerpt;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Succeeded
    }
}

/// Overall outcome of a coordination run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::PartiallySucceeded => write!(f, "partially succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub plan_id: PlanId,
    pub plan_created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// One result per dispatched task, in task-id order.
    pub results: Vec<WorkerResult>,
    /// Terminal status of every task, in task-id order.
    pub outcomes: Vec<TaskOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<StructuralError>,
}

impl ExecutionReport {
    /// Assemble a report; the overall status is derived from `outcomes`.
    pub fn completed(
        plan: &Plan,
        started_at: DateTime<Utc>,
        mut results: Vec<WorkerResult>,
        mut outcomes: Vec<TaskOutcome>,
    ) -> Self {
        results.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        outcomes.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        let status = Self::derive_status(&outcomes);
        Self {
            plan_id: plan.id,
            plan_created_at: plan.created_at,
            started_at,
            finished_at: Utc::now(),
            status,
            results,
            outcomes,
            abort: None,
        }
    }

    /// Report for a run refused before dispatch.
    pub fn aborted(plan: &Plan, started_at: DateTime<Utc>, error: StructuralError) -> Self {
        Self {
            plan_id: plan.id,
            plan_created_at: plan.created_at,
            started_at,
            finished_at: Utc::now(),
            status: RunStatus::Failed,
            results: Vec::new(),
            outcomes: Vec::new(),
            abort: Some(error),
        }
    }

    fn derive_status(outcomes: &[TaskOutcome]) -> RunStatus {
        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Succeeded)
            .count();
        if succeeded == outcomes.len() {
            RunStatus::Succeeded
        } else if succeeded > 0 {
            RunStatus::PartiallySucceeded
        } else {
            RunStatus::Failed
        }
    }

    pub fn succeeded(&self) -> Vec<&TaskId> {
        self.outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Succeeded)
            .map(|o| &o.task_id)
            .collect()
    }

    /// Failed tasks with their reasons.
    pub fn failed(&self) -> Vec<(&TaskId, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                TaskStatus::Failed { reason } => Some((&o.task_id, reason.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Blocked tasks with the failed task that blocked them.
    pub fn blocked(&self) -> Vec<(&TaskId, &TaskId)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                TaskStatus::Blocked { by } => Some((&o.task_id, by)),
                _ => None,
            })
            .collect()
    }

    pub fn result(&self, task_id: &TaskId) -> Option<&WorkerResult> {
        self.results.iter().find(|r| &r.task_id == task_id)
    }

    pub fn outcome(&self, task_id: &TaskId) -> Option<&TaskStatus> {
        self.outcomes
            .iter()
            .find(|o| &o.task_id == task_id)
            .map(|o| &o.status)
    }

    pub fn summary(&self) -> String {
        if let Some(abort) = &self.abort {
            return format!("{}: {}", self.status, abort);
        }
        format!(
            "{}: {} succeeded, {} failed, {} blocked",
            self.status,
            self.succeeded().len(),
            self.failed().len(),
            self.blocked().len()
        )
    }
}
