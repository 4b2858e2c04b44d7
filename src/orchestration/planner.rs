//! Request decomposition.
//!
//! The [`Planner`] asks the model backend for a JSON task list and decodes
//! the answer tolerantly. Any backend error, empty answer or undecodable
//! answer degrades to [`fallback_tasks`]; [`Planner::plan`] never fails.

use crate::adapters::{emit_best_effort, BackendError, Event, EventSink, LogSink, ModelBackend};
use crate::config::Config;
use crate::core::{FallbackReason, Plan, Workspace};
use crate::orchestration::decode::{decode_tasks, Decoded};
use crate::orchestration::fallback::fallback_tasks;
use crate::{clog, clog_debug, clog_warn};
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = r#"You are a senior software architect who coordinates multiple coding agents.
Break the user's request into atomic tasks. For each task provide:
- id: short unique identifier such as "T1"
- description: short imperative sentence
- target_files: list of relative file paths the task writes (empty list allowed)
- success_criteria: list of verifiable checks, preferably of the forms
  file `PATH` exists, file `PATH` contains `TEXT`, command `CMD` succeeds
- budget: estimated effort (small, medium, large)
- dependencies: list of task ids that must finish first (empty list allowed)
- tool_calls: optional list of explicit tool calls, each one of
  {"tool": "read_file", "path": ...}, {"tool": "write_file", "path": ..., "content": ...},
  {"tool": "list_files", "path": ...}, {"tool": "execute_command", "command": ...}
Return a JSON array of task objects and nothing else.
Keep tasks between 1 and {max_tasks} items. Respond with JSON only."#;

/// Build the planning prompt for `request`.
pub fn planning_prompt(request: &str, max_tasks: usize) -> String {
    let payload = serde_json::json!({
        "user_request": request,
        "max_tasks": max_tasks,
    });
    format!(
        "{}\n\n{}",
        SYSTEM_PROMPT.replace("{max_tasks}", &max_tasks.to_string()),
        payload
    )
}

/// Turns a request into a [`Plan`].
pub struct Planner {
    backend: Arc<dyn ModelBackend>,
    workspace: Workspace,
    max_tasks: usize,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    sink: Arc<dyn EventSink>,
}

impl Planner {
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

    pub fn new(backend: Arc<dyn ModelBackend>, workspace: Workspace) -> Self {
        let config = Config::default();
        Self {
            backend,
            workspace,
            max_tasks: config.max_tasks,
            timeout: config.backend_timeout(),
            retries: config.backend_retries,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            sink: Arc::new(LogSink),
        }
    }

    pub fn from_config(backend: Arc<dyn ModelBackend>, workspace: Workspace, config: &Config) -> Self {
        Self::new(backend, workspace)
            .with_max_tasks(config.max_tasks)
            .with_timeout(config.backend_timeout())
            .with_retries(config.backend_retries)
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts for transient backend errors.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Plan `request` with at most `max_tasks` tasks.
    pub async fn plan(&self, request: &str, max_tasks: usize) -> Plan {
        let max_tasks = max_tasks.max(1);
        let prompt = planning_prompt(request, max_tasks);

        let decoded = match self.generate(&prompt).await {
            Ok(text) => {
                clog_debug!("Planner raw response: {}", text);
                decode_tasks(&text, max_tasks, &self.workspace)
            }
            Err(e) => Decoded::ParseFailed(FallbackReason::Backend(e)),
        };

        let plan = match decoded {
            Decoded::Parsed(tasks) => Plan::new(tasks),
            Decoded::ParseFailed(reason) => {
                clog_warn!("Planning degraded to fallback: {}", reason);
                Plan::degraded(fallback_tasks(request), reason)
            }
        };

        clog!("Plan {} created with {} task(s)", plan.id.short(), plan.len());
        emit_best_effort(
            self.sink.as_ref(),
            Event::PlanCreated {
                plan_id: plan.id,
                task_count: plan.len(),
                fallback: plan.fallback.clone(),
            },
        );
        plan
    }

    /// Call the backend, retrying transient errors up to `retries` times.
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, self.backend.generate(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout),
            };

            emit_best_effort(
                self.sink.as_ref(),
                Event::PlanningAttempt {
                    attempt,
                    error: result.as_ref().err().copied(),
                },
            );

            match result {
                Err(e) if e.is_transient() && attempt <= self.retries => {
                    clog_warn!("Backend attempt {} failed ({}), retrying", attempt, e);
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(e) => {
                    clog_warn!("Backend attempt {} failed: {}", attempt, e);
                    return Err(e);
                }
                Ok(text) => return Ok(text),
            }
        }
    }
}
