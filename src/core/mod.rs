//! Core domain model for planning and coordination.
//!
//! Tasks, plans, the dependency graph built from a plan, working-directory
//! confinement and the result types a run produces.

pub mod dag;
pub mod plan;
pub mod report;
pub mod task;
pub mod workspace;

pub use dag::TaskGraph;
pub use plan::{FallbackReason, Plan, PlanId};
pub use report::{ExecutionReport, RunStatus, TaskError, TaskOutcome, WorkerResult, WorkerStatus};
pub use task::{Task, TaskId, TaskStatus};
pub use workspace::{PathEscape, Workspace};
