//! Task data model for the execution plan.
//!
//! Tasks are the atomic units of work handed to workers. A task declares
//! the files it will touch, the tasks it waits on and the checks that decide
//! whether it succeeded.

use crate::adapters::ToolCall;
use crate::util::natural_cmp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Identifier of a task, unique within its plan.
///
/// Ordering is natural (`T2 < T10`) and is the tie-break for every
/// scheduling decision that must be reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.0, &other.0)
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status in its lifecycle.
///
/// Only the coordinator moves a task between states.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Waiting on dependencies.
    #[default]
    Pending,
    /// Dependencies succeeded; waiting for a worker slot or file locks.
    Ready,
    /// Dispatched to a worker with its locks held.
    Running,
    Succeeded,
    Failed {
        reason: String,
    },
    /// Never dispatched because `by` failed (directly or transitively).
    Blocked {
        by: TaskId,
    },
}

impl TaskStatus {
    /// Succeeded, Failed and Blocked are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Blocked { .. }
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed { reason } => write!(f, "failed: {}", reason),
            TaskStatus::Blocked { by } => write!(f, "blocked by {}", by),
        }
    }
}

/// A single unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    /// Relative paths this task may write; each is locked while it runs.
    #[serde(default)]
    pub target_files: BTreeSet<PathBuf>,
    /// Ordered checks evaluated by the verifier.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    /// Advisory size/effort hint, never enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    /// Explicit tool calls; empty means the worker decides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    /// Create a pending task with no files, criteria or dependencies.
    pub fn new(id: impl Into<TaskId>, description: &str) -> Self {
        Self {
            id: id.into(),
            description: description.to_string(),
            target_files: BTreeSet::new(),
            success_criteria: Vec::new(),
            dependencies: BTreeSet::new(),
            budget: None,
            tool_calls: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    pub fn with_target(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_files.insert(path.into());
        self
    }

    pub fn with_criterion(mut self, criterion: &str) -> Self {
        self.success_criteria.push(criterion.to_string());
        self
    }

    pub fn with_dependency(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
    }

    pub fn succeed(&mut self) {
        self.status = TaskStatus::Succeeded;
    }

    pub fn fail(&mut self, reason: &str) {
        self.status = TaskStatus::Failed {
            reason: reason.to_string(),
        };
    }

    pub fn block(&mut self, by: &TaskId) {
        self.status = TaskStatus::Blocked { by: by.clone() };
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
