//! Test fixtures for integration tests.
//!
//! Provides scripted backends, a tracing worker and a harness that wires a
//! coordinator to a temporary workspace and a channel event sink.

use async_trait::async_trait;
use conductor::adapters::{
    BackendError, ChannelSink, Event, EventSink, LocalToolHost, ModelBackend, OfflineBackend,
};
use conductor::core::TaskError;
use conductor::orchestration::Worker;
use conductor::{
    Coordinator, LockRegistry, Planner, Task, TaskId, ToolWorker, WorkerPool, WorkerResult,
    Workspace,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Default pool timeout for harness runs.
pub const TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend that returns the same response on every call.
pub struct ScriptedBackend {
    response: Result<String, BackendError>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn replying(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: BackendError) -> Self {
        Self {
            response: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

/// When a traced task ran.
#[derive(Debug, Clone)]
pub struct Span {
    pub task_id: TaskId,
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Worker that sleeps for a fixed delay and records a [`Span`] per task.
///
/// Clones share the same trace, so several coordinators can write into one
/// timeline.
#[derive(Clone)]
pub struct TraceWorker {
    delay: Duration,
    failing: Arc<HashSet<TaskId>>,
    spans: Arc<Mutex<Vec<Span>>>,
}

impl TraceWorker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing: Arc::new(HashSet::new()),
            spans: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(mut self, ids: &[&str]) -> Self {
        self.failing = Arc::new(ids.iter().map(|id| TaskId::from(*id)).collect());
        self
    }

    /// Recorded spans, in completion order.
    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }

    pub fn span(&self, id: &str) -> Span {
        self.spans()
            .into_iter()
            .find(|s| s.task_id.as_str() == id)
            .unwrap_or_else(|| panic!("task {} never ran", id))
    }

    /// Highest number of spans running at the same instant.
    pub fn peak_concurrency(&self) -> usize {
        let spans = self.spans();
        spans
            .iter()
            .map(|s| {
                spans
                    .iter()
                    .filter(|o| o.start <= s.start && s.start < o.end)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Worker for TraceWorker {
    async fn run(&self, task: &Task) -> WorkerResult {
        let start = Instant::now();
        tokio::time::sleep(self.delay).await;
        let end = Instant::now();
        self.spans.lock().unwrap().push(Span {
            task_id: task.id.clone(),
            start,
            end,
        });

        if self.failing.contains(&task.id) {
            WorkerResult::failed(
                task.id.clone(),
                TaskError::Crashed {
                    message: "scripted failure".to_string(),
                },
            )
        } else {
            WorkerResult::succeeded(task.id.clone(), vec![], format!("ran {}", task.id))
        }
    }
}

/// Coordinator over a temporary workspace with a channel event sink.
pub struct CoordinatorHarness {
    pub dir: TempDir,
    pub workspace: Workspace,
    pub coordinator: Coordinator,
    pub events: mpsc::Receiver<Event>,
}

impl CoordinatorHarness {
    /// Offline planner, `worker` with `max_workers` slots.
    pub fn new(worker: Arc<dyn Worker>, max_workers: usize) -> Self {
        Self::build(Arc::new(OfflineBackend), |_| worker, max_workers, TASK_TIMEOUT)
    }

    /// Scripted planner and a real tool worker rooted in the temp dir.
    pub fn with_tools(backend: Arc<dyn ModelBackend>, call_timeout: Duration) -> Self {
        Self::build(
            backend,
            |ws| tool_worker(ws, call_timeout),
            2,
            TASK_TIMEOUT,
        )
    }

    pub fn build(
        backend: Arc<dyn ModelBackend>,
        worker: impl FnOnce(&Workspace) -> Arc<dyn Worker>,
        max_workers: usize,
        task_timeout: Duration,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::new(dir.path().canonicalize().unwrap());
        let (sink, events) = ChannelSink::channel(256);
        let sink: Arc<dyn EventSink> = Arc::new(sink);

        let planner = Planner::new(backend, workspace.clone()).with_sink(sink.clone());
        let pool = WorkerPool::new(worker(&workspace), max_workers, task_timeout);
        let coordinator = Coordinator::new(planner, pool, workspace.clone()).with_sink(sink);

        Self {
            dir,
            workspace,
            coordinator,
            events,
        }
    }

    /// Replace the coordinator's lock registry.
    pub fn share_registry(mut self, registry: LockRegistry) -> Self {
        self.coordinator = self.coordinator.with_registry(registry);
        self
    }

    /// Everything emitted so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn read(&self, path: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(path)).unwrap()
    }
}

pub fn tool_worker(workspace: &Workspace, call_timeout: Duration) -> Arc<dyn Worker> {
    let host = LocalToolHost::new(workspace.clone()).with_command_timeout(Duration::from_secs(30));
    Arc::new(ToolWorker::new(workspace.clone(), Arc::new(host)).with_call_timeout(call_timeout))
}

/// A task with the given dependencies.
pub fn task(id: &str, deps: &[&str]) -> Task {
    deps.iter()
        .fold(Task::new(id, &format!("do {}", id)), |t, dep| {
            t.with_dependency(*dep)
        })
}

/// A task that writes the given files.
pub fn writing(id: &str, files: &[&str]) -> Task {
    files
        .iter()
        .fold(task(id, &[]), |t, file| t.with_target(*file))
}

pub fn id(s: &str) -> TaskId {
    TaskId::from(s)
}
