//! Tool host seam and the local implementation.
//!
//! A tool call is one of four typed operations. The worker hands calls to a
//! [`ToolHost`]; [`LocalToolHost`] runs them against a working directory with
//! `tokio::fs` and `sh -c`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::clog_debug;
use crate::core::Workspace;

fn default_list_path() -> String {
    ".".to_string()
}

/// One tool invocation.
///
/// Serialised with a `tool` tag so planner output such as
/// `{"tool": "write_file", "path": "a.txt", "content": "hi"}` decodes directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "tool")]
pub enum ToolCall {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ListFiles {
        #[serde(default = "default_list_path")]
        path: String,
    },
    ExecuteCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
}

impl ToolCall {
    /// Build a call from a tool name and an argument map.
    pub fn from_parts(
        name: &str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        let mut object = args;
        object.insert("tool".to_string(), serde_json::Value::String(name.to_string()));
        serde_json::from_value(serde_json::Value::Object(object))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ReadFile { .. } => "read_file",
            ToolCall::WriteFile { .. } => "write_file",
            ToolCall::ListFiles { .. } => "list_files",
            ToolCall::ExecuteCommand { .. } => "execute_command",
        }
    }

    /// The path argument, for calls that take one.
    pub fn path(&self) -> Option<&str> {
        match self {
            ToolCall::ReadFile { path }
            | ToolCall::WriteFile { path, .. }
            | ToolCall::ListFiles { path } => Some(path),
            ToolCall::ExecuteCommand { .. } => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, ToolCall::WriteFile { .. })
    }
}

/// Successful result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ToolOutput {
    Content { text: String },
    Written { path: PathBuf, bytes: usize },
    Listing { entries: Vec<String> },
    Command { stdout: String, stderr: String },
}

impl ToolOutput {
    /// Text contributed to a worker's stdout excerpt.
    pub fn transcript(&self) -> String {
        match self {
            ToolOutput::Content { text } => text.clone(),
            ToolOutput::Written { path, bytes } => {
                format!("wrote {} bytes to {}\n", bytes, path.display())
            }
            ToolOutput::Listing { entries } => {
                let mut out = entries.join("\n");
                out.push('\n');
                out
            }
            ToolOutput::Command { stdout, .. } => stdout.clone(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ToolError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("path escapes the working directory: {path}")]
    PathEscape { path: String },

    #[error("I/O error: {message}")]
    Io { message: String },
}

impl ToolError {
    fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => ToolError::PermissionDenied {
                path: path.to_string(),
            },
            _ => ToolError::Io {
                message: err.to_string(),
            },
        }
    }
}

/// Executes tool calls on behalf of a worker.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput, ToolError>;
}

/// Runs tools against a local working directory.
#[derive(Debug, Clone)]
pub struct LocalToolHost {
    workspace: Workspace,
    command_timeout: Duration,
}

impl LocalToolHost {
    /// Default ceiling for `execute_command` (60 seconds).
    pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            command_timeout: Self::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn locate(&self, path: &str) -> Result<(PathBuf, PathBuf), ToolError> {
        let relative = self
            .workspace
            .resolve(path)
            .map_err(|e| ToolError::PathEscape { path: e.path })?;
        let absolute = self.workspace.root().join(&relative);
        Ok((relative, absolute))
    }

    async fn read_file(&self, path: &str) -> Result<ToolOutput, ToolError> {
        let (_, absolute) = self.locate(path)?;
        let text = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|e| ToolError::from_io(e, path))?;
        Ok(ToolOutput::Content { text })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<ToolOutput, ToolError> {
        let (relative, absolute) = self.locate(path)?;
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::from_io(e, path))?;
        }
        tokio::fs::write(&absolute, content)
            .await
            .map_err(|e| ToolError::from_io(e, path))?;
        Ok(ToolOutput::Written {
            path: relative,
            bytes: content.len(),
        })
    }

    async fn list_files(&self, path: &str) -> Result<ToolOutput, ToolError> {
        let (_, absolute) = self.locate(path)?;
        let mut dir = tokio::fs::read_dir(&absolute)
            .await
            .map_err(|e| ToolError::from_io(e, path))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::from_io(e, path))?
        {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(ToolOutput::Listing { entries })
    }

    async fn execute_command(
        &self,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> Result<ToolOutput, ToolError> {
        let limit = timeout_secs
            .map(Duration::from_secs)
            .map_or(self.command_timeout, |t| t.min(self.command_timeout));

        clog_debug!("execute_command: {} (timeout {:?})", command, limit);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.workspace.root())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(limit, child)
            .await
            .map_err(|_| ToolError::Timeout {
                millis: limit.as_millis() as u64,
            })?
            .map_err(|e| ToolError::from_io(e, "sh"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(ToolError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(ToolOutput::Command { stdout, stderr })
    }
}

#[async_trait]
impl ToolHost for LocalToolHost {
    async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        match call {
            ToolCall::ReadFile { path } => self.read_file(path).await,
            ToolCall::WriteFile { path, content } => self.write_file(path, content).await,
            ToolCall::ListFiles { path } => self.list_files(path).await,
            ToolCall::ExecuteCommand {
                command,
                timeout_secs,
            } => self.execute_command(command, *timeout_secs).await,
        }
    }
}
