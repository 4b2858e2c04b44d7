//! Bounded worker pool.
//!
//! The `WorkerPool` runs tasks on a shared [`Worker`] with at most
//! `max_concurrent` tasks in flight and a hard per-task timeout. Each
//! coordination run opens its own [`PoolRun`], so concurrent runs never see
//! each other's results.

use crate::core::{Task, TaskError, TaskId, WorkerResult};
use crate::orchestration::worker::Worker;
use crate::{clog_error, clog_warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Shared worker plus the limits every run obeys.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use std::time::Duration;
/// use conductor::orchestration::WorkerPool;
///
/// let pool = WorkerPool::new(worker, 3, Duration::from_secs(600));
/// let mut run = pool.start_run();
/// assert!(run.has_capacity());
/// assert_eq!(run.active_count(), 0);
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    worker: Arc<dyn Worker>,
    max_concurrent: usize,
    task_timeout: Duration,
}

impl WorkerPool {
    /// Create a pool.
    ///
    /// # Arguments
    ///
    /// * `worker` - Executes each dispatched task
    /// * `max_concurrent` - Maximum tasks running at once (at least 1)
    /// * `task_timeout` - Hard limit on one task; exceeding it fails the task
    pub fn new(worker: Arc<dyn Worker>, max_concurrent: usize, task_timeout: Duration) -> Self {
        Self {
            worker,
            max_concurrent: max_concurrent.max(1),
            task_timeout,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Open a run with its own in-flight set.
    pub fn start_run(&self) -> PoolRun {
        PoolRun {
            pool: self.clone(),
            running: JoinSet::new(),
            in_flight: BTreeSet::new(),
        }
    }
}

/// Tasks in flight for one coordination run.
pub struct PoolRun {
    pool: WorkerPool,
    running: JoinSet<WorkerResult>,
    in_flight: BTreeSet<TaskId>,
}

impl PoolRun {
    /// Start `task` on the worker.
    ///
    /// The worker runs in its own tokio task so a panic or a blown timeout
    /// is turned into a failed result instead of taking the run down.
    ///
    /// # Returns
    ///
    /// `false` (and nothing is started) if the run is at capacity.
    pub fn spawn(&mut self, task: Task) -> bool {
        if !self.has_capacity() {
            return false;
        }

        let worker = self.pool.worker.clone();
        let timeout = self.pool.task_timeout;
        let task_id = task.id.clone();
        self.in_flight.insert(task_id.clone());

        self.running.spawn(async move {
            let mut handle = tokio::spawn(async move { worker.run(&task).await });
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => {
                    clog_error!("Worker for task {} crashed: {}", task_id, join_error);
                    WorkerResult::failed(
                        task_id,
                        TaskError::Crashed {
                            message: join_error.to_string(),
                        },
                    )
                }
                Err(_) => {
                    handle.abort();
                    clog_warn!("Task {} exceeded its {:?} timeout", task_id, timeout);
                    WorkerResult::failed(task_id, TaskError::timeout(timeout))
                }
            }
        });
        true
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.pool.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Ids of the tasks currently running, sorted.
    pub fn in_flight(&self) -> impl Iterator<Item = &TaskId> {
        self.in_flight.iter()
    }

    /// Wait for the next task to finish.
    ///
    /// Returns `None` when nothing is running. Tasks whose supervisor was
    /// lost are left in [`PoolRun::in_flight`] until that point, then
    /// handed back by [`PoolRun::take_lost`].
    pub async fn next_result(&mut self) -> Option<WorkerResult> {
        loop {
            match self.running.join_next().await {
                Some(Ok(result)) => {
                    self.in_flight.remove(&result.task_id);
                    return Some(result);
                }
                Some(Err(e)) => clog_error!("Pool supervisor task failed: {}", e),
                None => return None,
            }
        }
    }

    /// Drain ids still marked in flight once nothing is left running.
    pub fn take_lost(&mut self) -> Vec<TaskId> {
        if !self.running.is_empty() {
            return Vec::new();
        }
        std::mem::take(&mut self.in_flight).into_iter().collect()
    }
}
