//! Orchestration layer for conductor.
//!
//! This module turns a request into a plan and a plan into an execution
//! report: the planner with its tolerant decoder and deterministic fallback,
//! the lock registry, the worker pool, workers, the verifier and the
//! coordinator that drives them.

pub mod coordinator;
pub mod decode;
pub mod fallback;
pub mod locks;
pub mod planner;
pub mod pool;
pub mod verifier;
pub mod worker;

pub use coordinator::Coordinator;
pub use decode::{decode_tasks, decode_tool_calls, sanitize, Decoded};
pub use fallback::{fallback_tasks, ADDRESSED_CRITERION};
pub use locks::{Contention, Holder, Lock, LockRegistry};
pub use planner::Planner;
pub use pool::{PoolRun, WorkerPool};
pub use verifier::{Criterion, ObservedEffects, Verifier};
pub use worker::{ToolWorker, Worker};
