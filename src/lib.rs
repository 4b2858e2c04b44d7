pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod util;

pub use core::{
    ExecutionReport, Plan, PlanId, RunStatus, Task, TaskId, TaskStatus, WorkerResult, Workspace,
};
pub use error::{Error, Result, StructuralError};
pub use orchestration::{Coordinator, LockRegistry, Planner, ToolWorker, WorkerPool};
