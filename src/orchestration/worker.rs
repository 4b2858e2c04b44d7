//! Task execution.
//!
//! A [`Worker`] runs one task and reports a [`WorkerResult`]. It never
//! touches task status or locks; the coordinator owns both.

use crate::adapters::{ModelBackend, ToolCall, ToolError, ToolHost};
use crate::core::{Task, TaskError, WorkerResult, Workspace};
use crate::orchestration::decode::decode_tool_calls;
use crate::orchestration::verifier::{ObservedEffects, Verifier};
use crate::util::excerpt;
use crate::{clog_debug, clog_warn};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Characters of tool output kept in a result.
pub const EXCERPT_CHARS: usize = 500;

#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, task: &Task) -> WorkerResult;
}

/// Build the prompt asking the model for a task's tool calls.
pub fn worker_prompt(task: &Task) -> String {
    let mut parts = vec![
        format!("Task ID: {}", task.id),
        format!("Description: {}", task.description),
        String::new(),
    ];

    if !task.target_files.is_empty() {
        parts.push("Files to work with:".to_string());
        parts.extend(task.target_files.iter().map(|f| format!("  - {}", f.display())));
        parts.push(String::new());
    }
    if !task.success_criteria.is_empty() {
        parts.push("Success criteria:".to_string());
        parts.extend(task.success_criteria.iter().map(|c| format!("  - {}", c)));
        parts.push(String::new());
    }

    parts.extend(
        [
            "AVAILABLE TOOLS:",
            r#"1. {"tool": "read_file", "path": "config.py"}"#,
            r#"2. {"tool": "write_file", "path": "hello.py", "content": "print(\"Hello\")"}"#,
            r#"3. {"tool": "list_files", "path": "."}"#,
            r#"4. {"tool": "execute_command", "command": "python hello.py"}"#,
            "",
            "Paths are relative to the working directory and must stay inside it.",
            "Only write files listed under \"Files to work with\".",
            "Return the tool calls that complete this task as JSON with this exact format:",
            r#"{"tool_calls": [ ... ]}"#,
            "Respond with JSON only.",
        ]
        .map(String::from),
    );
    parts.join("\n")
}

/// Runs a task's tool calls through a [`ToolHost`], then verifies it.
pub struct ToolWorker {
    workspace: Workspace,
    host: Arc<dyn ToolHost>,
    backend: Option<Arc<dyn ModelBackend>>,
    verifier: Verifier,
    call_timeout: Duration,
    task_timeout: Duration,
}

/// Why the call loop stopped early.
struct Abort {
    error: TaskError,
}

impl ToolWorker {
    pub fn new(workspace: Workspace, host: Arc<dyn ToolHost>) -> Self {
        let call_timeout = Duration::from_secs(60);
        Self {
            verifier: Verifier::new(workspace.clone(), host.clone()).with_command_timeout(call_timeout),
            workspace,
            host,
            backend: None,
            call_timeout,
            task_timeout: Duration::from_secs(600),
        }
    }

    /// Ask `backend` for tool calls when a task has none.
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self.verifier = self.verifier.with_command_timeout(timeout);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Calls to run for `task` and whether they are purely observational.
    async fn plan_calls(&self, task: &Task, deadline: Instant) -> (Vec<ToolCall>, bool) {
        if !task.tool_calls.is_empty() {
            return (task.tool_calls.clone(), false);
        }

        if let Some(backend) = &self.backend {
            let prompt = worker_prompt(task);
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, backend.generate(&prompt)).await {
                Ok(Ok(text)) => match decode_tool_calls(&text) {
                    Some(calls) if !calls.is_empty() => return (calls, false),
                    _ => clog_warn!("Task {}: no usable tool calls in model response", task.id),
                },
                Ok(Err(e)) => clog_warn!("Task {}: backend error {}, inferring calls", task.id, e),
                Err(_) => clog_warn!("Task {}: backend timed out, inferring calls", task.id),
            }
        }

        let calls = if task.target_files.is_empty() {
            vec![ToolCall::ListFiles {
                path: ".".to_string(),
            }]
        } else {
            task.target_files
                .iter()
                .map(|path| ToolCall::ReadFile {
                    path: path.to_string_lossy().to_string(),
                })
                .collect()
        };
        (calls, true)
    }

    async fn invoke_all(
        &self,
        task: &Task,
        calls: &[ToolCall],
        observational: bool,
        deadline: Instant,
        observed: &mut ObservedEffects,
    ) -> Result<(), Abort> {
        let writable: BTreeSet<PathBuf> = task
            .target_files
            .iter()
            .filter_map(|path| self.workspace.resolve(path).ok())
            .collect();

        for call in calls {
            if let Some(path) = call.path() {
                let resolved = self
                    .workspace
                    .resolve(path)
                    .map_err(|e| Abort { error: e.into() })?;
                // Only target files are locked for the task's running interval.
                if call.is_write() && !writable.contains(&resolved) {
                    clog_warn!("Task {}: refusing undeclared write to {}", task.id, path);
                    return Err(Abort {
                        error: TaskError::UndeclaredWrite {
                            path: resolved.display().to_string(),
                        },
                    });
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let per_call = match call {
                ToolCall::ExecuteCommand {
                    timeout_secs: Some(secs),
                    ..
                } => Duration::from_secs(*secs).min(self.call_timeout),
                _ => self.call_timeout,
            };
            let (limit, budget) = if remaining < per_call {
                (remaining, self.task_timeout)
            } else {
                (per_call, per_call)
            };

            clog_debug!("invoke {} ({:?})", call.name(), limit);
            observed.calls_made += 1;
            let outcome = tokio::time::timeout(limit, self.host.invoke(call))
                .await
                .map_err(|_| Abort {
                    error: TaskError::timeout(budget),
                })?;

            match outcome {
                Ok(output) => {
                    observed.transcript.push_str(&output.transcript());
                    if let (true, Some(path)) = (call.is_write(), call.path()) {
                        if let Ok(path) = self.workspace.resolve(path) {
                            if !observed.modified_paths.contains(&path) {
                                observed.modified_paths.push(path);
                            }
                        }
                    }
                }
                Err(ToolError::NotFound { .. }) if observational => {}
                Err(ToolError::Timeout { millis }) => {
                    observed.calls_failed += 1;
                    return Err(Abort {
                        error: TaskError::Timeout { millis },
                    });
                }
                Err(error) => {
                    observed.calls_failed += 1;
                    if let ToolError::NonZeroExit { stderr, .. } = &error {
                        observed.transcript.push_str(stderr);
                    }
                    return Err(Abort {
                        error: TaskError::Tool {
                            tool: call.name().to_string(),
                            error,
                        },
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for ToolWorker {
    async fn run(&self, task: &Task) -> WorkerResult {
        let deadline = Instant::now() + self.task_timeout;
        let mut observed = ObservedEffects::default();

        let (calls, observational) = self.plan_calls(task, deadline).await;
        clog_debug!("Task {}: {} tool call(s)", task.id, calls.len());

        let outcome = match self.invoke_all(task, &calls, observational, deadline, &mut observed).await {
            Ok(()) => self.verifier.check(task, &observed).await,
            Err(abort) => Err(abort.error),
        };

        let stdout_excerpt = excerpt(&observed.transcript, EXCERPT_CHARS);
        match outcome {
            Ok(()) => WorkerResult::succeeded(task.id.clone(), observed.modified_paths, stdout_excerpt),
            Err(error) => {
                clog_warn!("Task {} failed: {}", task.id, error);
                WorkerResult::failed(task.id.clone(), error)
                    .with_partial_effects(observed.modified_paths, stdout_excerpt)
            }
        }
    }
}
