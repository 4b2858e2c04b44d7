//! Coordinator for plan execution.
//!
//! The Coordinator walks a plan's task graph, takes file locks for ready
//! tasks, dispatches them to the worker pool and folds the results into an
//! [`ExecutionReport`]. Its dispatch loop is the only place task status and
//! lock ownership change.

use crate::adapters::{emit_best_effort, Event, EventSink, LogSink};
use crate::core::{
    ExecutionReport, Plan, PlanId, Task, TaskError, TaskGraph, TaskId, TaskOutcome, TaskStatus,
    WorkerResult, Workspace,
};
use crate::orchestration::locks::{Holder, LockRegistry};
use crate::orchestration::planner::Planner;
use crate::orchestration::pool::{PoolRun, WorkerPool};
use crate::{clog, clog_debug, clog_error, clog_warn};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Live task statuses per plan, readable while runs are in progress.
type StatusBoard = Arc<RwLock<HashMap<PlanId, BTreeMap<TaskId, TaskStatus>>>>;

/// Plans requests and executes plans.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use conductor::orchestration::{Coordinator, Planner, WorkerPool};
///
/// let coordinator = Coordinator::new(planner, pool, workspace);
/// let plan = coordinator.plan("Create hello.py with a print statement").await;
/// let report = coordinator.execute(&plan).await;
/// println!("{}", report.summary());
/// ```
pub struct Coordinator {
    planner: Planner,
    pool: WorkerPool,
    registry: LockRegistry,
    workspace: Workspace,
    sink: Arc<dyn EventSink>,
    board: StatusBoard,
}

/// Per-run bookkeeping owned by the dispatch loop.
struct RunState<'a> {
    plan: &'a Plan,
    graph: TaskGraph,
    tasks: BTreeMap<TaskId, Task>,
    statuses: BTreeMap<TaskId, TaskStatus>,
    results: Vec<WorkerResult>,
}

impl RunState<'_> {
    fn holder(&self, id: &TaskId) -> Holder {
        Holder::new(self.plan.id, id.clone())
    }

    fn ids_in(&self, wanted: impl Fn(&TaskStatus) -> bool) -> Vec<TaskId> {
        self.statuses
            .iter()
            .filter(|(_, status)| wanted(status))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Move every pending task whose dependencies all succeeded to Ready.
    fn promote(&mut self) {
        for id in self.ids_in(|s| *s == TaskStatus::Pending) {
            let satisfied = self
                .graph
                .dependencies(&id)
                .into_iter()
                .all(|dep| self.statuses.get(dep) == Some(&TaskStatus::Succeeded));
            if satisfied {
                self.statuses.insert(id, TaskStatus::Ready);
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.statuses.values().all(TaskStatus::is_terminal)
    }
}

impl Coordinator {
    /// Create a coordinator with its own lock registry.
    ///
    /// # Arguments
    ///
    /// * `planner` - Turns requests into plans
    /// * `pool` - Runs dispatched tasks
    /// * `workspace` - Root that every target file must stay inside
    pub fn new(planner: Planner, pool: WorkerPool, workspace: Workspace) -> Self {
        Self {
            planner,
            pool,
            registry: LockRegistry::new(),
            workspace,
            sink: Arc::new(LogSink),
            board: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Share a lock registry with other coordinators.
    pub fn with_registry(mut self, registry: LockRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &LockRegistry {
        &self.registry
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Plan `request` with the planner's task limit.
    pub async fn plan(&self, request: &str) -> Plan {
        self.planner.plan(request, self.planner.max_tasks()).await
    }

    /// Current status of every task in `plan_id`, if that plan was executed.
    pub async fn status(&self, plan_id: &PlanId) -> Option<BTreeMap<TaskId, TaskStatus>> {
        self.board.read().await.get(plan_id).cloned()
    }

    /// Drop `plan_id` from the status board, returning its last statuses.
    ///
    /// The board keeps every executed plan until it is forgotten.
    pub async fn forget(&self, plan_id: &PlanId) -> Option<BTreeMap<TaskId, TaskStatus>> {
        self.board.write().await.remove(plan_id)
    }

    async fn publish(&self, state: &RunState<'_>) {
        self.board
            .write()
            .await
            .insert(state.plan.id, state.statuses.clone());
    }

    fn emit(&self, event: Event) {
        emit_best_effort(self.sink.as_ref(), event);
    }

    /// Execute `plan` to completion.
    ///
    /// Structural defects (cycles, unknown or duplicate ids) abort the run
    /// before anything is dispatched. Task failures never abort the run;
    /// they block the failed task's dependents and every other branch keeps
    /// going.
    pub async fn execute(&self, plan: &Plan) -> ExecutionReport {
        let started_at = Utc::now();
        clog!("Executing plan {} ({} tasks)", plan.id.short(), plan.len());

        let graph = match TaskGraph::build(&plan.tasks) {
            Ok(graph) => graph,
            Err(e) => {
                clog_error!("Plan {} rejected: {}", plan.id.short(), e);
                let report = ExecutionReport::aborted(plan, started_at, e);
                self.emit(Event::RunFinished {
                    plan_id: plan.id,
                    status: report.status,
                });
                return report;
            }
        };

        let mut state = RunState {
            plan,
            graph,
            tasks: BTreeMap::new(),
            statuses: BTreeMap::new(),
            results: Vec::new(),
        };

        let mut rejected = Vec::new();
        for task in &plan.tasks {
            let mut task = task.clone();
            task.status = TaskStatus::Pending;
            match self.normalise_targets(&task) {
                Ok(targets) => task.target_files = targets.into_iter().collect(),
                Err(error) => rejected.push(WorkerResult::failed(task.id.clone(), error)),
            }
            state.statuses.insert(task.id.clone(), TaskStatus::Pending);
            state.tasks.insert(task.id.clone(), task);
        }
        for result in rejected {
            self.settle(&mut state, result);
        }

        self.dispatch_loop(&mut state).await;

        // Anything still unresolved is blocked by a dependency that did not
        // succeed.
        for id in state.ids_in(|s| !s.is_terminal()) {
            let by = state
                .graph
                .dependencies(&id)
                .into_iter()
                .find(|dep| state.statuses.get(*dep) != Some(&TaskStatus::Succeeded))
                .cloned()
                .unwrap_or_else(|| id.clone());
            self.block(&mut state, &id, &by);
        }
        self.publish(&state).await;

        let outcomes = state
            .statuses
            .iter()
            .map(|(id, status)| TaskOutcome {
                task_id: id.clone(),
                status: status.clone(),
            })
            .collect();
        let report = ExecutionReport::completed(plan, started_at, state.results, outcomes);
        clog!("Plan {} {}", plan.id.short(), report.summary());
        self.emit(Event::RunFinished {
            plan_id: plan.id,
            status: report.status,
        });
        report
    }

    fn normalise_targets(&self, task: &Task) -> Result<Vec<PathBuf>, TaskError> {
        task.target_files
            .iter()
            .map(|path| self.workspace.resolve(path).map_err(TaskError::from))
            .collect()
    }

    async fn dispatch_loop(&self, state: &mut RunState<'_>) {
        let mut run = self.pool.start_run();
        let mut released = self.registry.subscribe();

        loop {
            released.borrow_and_update();
            state.promote();
            let waiting = self.dispatch_ready(state, &mut run);
            self.publish(state).await;

            if run.active_count() == 0 {
                if waiting == 0 || state.is_finished() {
                    break;
                }
                // Only locks held by another run can stall us here.
                clog_debug!("{} ready task(s) waiting on foreign locks", waiting);
                if released.changed().await.is_err() {
                    break;
                }
                continue;
            }

            tokio::select! {
                result = run.next_result() => {
                    match result {
                        Some(result) => {
                            self.registry.release_all(&state.holder(&result.task_id));
                            self.settle(state, result);
                        }
                        None => {
                            for id in run.take_lost() {
                                self.registry.release_all(&state.holder(&id));
                                let lost = WorkerResult::failed(
                                    id,
                                    TaskError::Crashed {
                                        message: "worker lost".to_string(),
                                    },
                                );
                                self.settle(state, lost);
                            }
                        }
                    }
                }
                changed = released.changed(), if waiting > 0 => {
                    if changed.is_err() {
                        clog_warn!("Lock registry notifications closed");
                    }
                }
            }
        }
    }

    /// Dispatch ready tasks in id order while capacity remains.
    ///
    /// Returns the number of ready tasks left waiting.
    fn dispatch_ready(&self, state: &mut RunState<'_>, run: &mut PoolRun) -> usize {
        let mut waiting = 0;
        for id in state.ids_in(|s| *s == TaskStatus::Ready) {
            if !run.has_capacity() {
                waiting += 1;
                continue;
            }
            let Some(task) = state.tasks.get(&id) else {
                continue;
            };
            let holder = state.holder(&id);
            match self
                .registry
                .acquire_all(task.target_files.iter().map(PathBuf::as_path), &holder)
            {
                Ok(()) => {
                    let mut task = task.clone();
                    task.start();
                    clog!("Dispatching task {}", id);
                    run.spawn(task);
                    state.statuses.insert(id.clone(), TaskStatus::Running);
                    self.emit(Event::TaskStarted {
                        plan_id: state.plan.id,
                        task_id: id,
                    });
                }
                Err(contention) => {
                    clog_debug!(
                        "Task {} waits for {} held by {}",
                        id,
                        contention.path.display(),
                        contention.holder
                    );
                    waiting += 1;
                }
            }
        }
        waiting
    }

    /// Record a finished task and propagate failure to its dependents.
    fn settle(&self, state: &mut RunState<'_>, result: WorkerResult) {
        let id = result.task_id.clone();
        if result.is_success() {
            clog!("Task {} succeeded", id);
            state.statuses.insert(id.clone(), TaskStatus::Succeeded);
            self.emit(Event::TaskCompleted {
                plan_id: state.plan.id,
                task_id: id,
            });
        } else {
            let reason = result
                .error
                .as_ref()
                .map_or_else(|| "unknown error".to_string(), ToString::to_string);
            clog_warn!("Task {} failed: {}", id, reason);
            state.statuses.insert(
                id.clone(),
                TaskStatus::Failed {
                    reason: reason.clone(),
                },
            );
            self.emit(Event::TaskFailed {
                plan_id: state.plan.id,
                task_id: id.clone(),
                reason,
            });
            for dependent in state.graph.downstream(&id) {
                if !state.statuses.get(&dependent).is_some_and(TaskStatus::is_terminal) {
                    self.block(state, &dependent, &id);
                }
            }
        }
        state.results.push(result);
    }

    fn block(&self, state: &mut RunState<'_>, id: &TaskId, by: &TaskId) {
        clog!("Task {} blocked by {}", id, by);
        state
            .statuses
            .insert(id.clone(), TaskStatus::Blocked { by: by.clone() });
        self.emit(Event::TaskBlocked {
            plan_id: state.plan.id,
            task_id: id.clone(),
            by: by.clone(),
        });
    }
}
