//! Model backend seam and a command-line implementation.
//!
//! The planner (and optionally the worker) talk to a text-generating model
//! through [`ModelBackend`]. [`CommandBackend`] drives any CLI that takes the
//! prompt as its last argument and prints the answer, such as Claude Code in
//! headless mode (`claude -p --output-format json`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::{clog_debug, clog_trace};

/// Typed failure of a generation request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendError {
    #[error("authentication failed")]
    AuthFailure,
    #[error("rate limited")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("backend unavailable")]
    Unavailable,
}

impl BackendError {
    /// Errors worth retrying before giving up on the backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::RateLimited | BackendError::Timeout)
    }

    /// Classify a failure message from a backend process.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if ["401", "403", "unauthorized", "forbidden", "api key", "authentication", "auth"]
            .iter()
            .any(|p| lower.contains(p))
        {
            BackendError::AuthFailure
        } else if ["429", "rate limit", "rate-limit", "too many requests", "overloaded"]
            .iter()
            .any(|p| lower.contains(p))
        {
            BackendError::RateLimited
        } else if lower.contains("timed out") || lower.contains("timeout") {
            BackendError::Timeout
        } else {
            BackendError::Unavailable
        }
    }
}

/// A text-generating model.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Backend for when no model is reachable; every request is `Unavailable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBackend;

#[async_trait]
impl ModelBackend for OfflineBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
        Err(BackendError::Unavailable)
    }
}

/// Claude-style JSON envelope printed with `--output-format json`.
#[derive(Debug, Deserialize)]
struct Envelope {
    subtype: Option<String>,
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    error: Option<String>,
}

/// Runs a CLI per prompt.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    binary: PathBuf,
    args: Vec<String>,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandBackend {
    /// Default timeout for one generation (5 minutes).
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    /// Build from a whitespace-separated command line, e.g. `claude -p`.
    ///
    /// Returns `Unavailable` if the command is empty or the binary cannot
    /// be found on `PATH`.
    pub fn from_command_line(command: &str, cwd: &Path) -> Result<Self, BackendError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(BackendError::Unavailable)?;
        let binary = which::which(program).map_err(|_| BackendError::Unavailable)?;
        Ok(Self {
            binary,
            args: parts.map(String::from).collect(),
            cwd: cwd.to_path_buf(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    /// Use a specific binary without a `PATH` lookup.
    pub fn with_binary(binary: PathBuf, args: Vec<String>, cwd: &Path) -> Self {
        Self {
            binary,
            args,
            cwd: cwd.to_path_buf(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Extract the answer text from stdout.
    ///
    /// A JSON envelope is unwrapped when present; anything else is returned
    /// as-is (trimmed) for the planner's tolerant decoder to deal with.
    pub fn parse_output(stdout: &str) -> Result<String, BackendError> {
        match serde_json::from_str::<Envelope>(stdout.trim()) {
            Ok(envelope) => {
                let failed = envelope.is_error || envelope.subtype.as_deref() == Some("error");
                if failed {
                    let message = envelope.error.or(envelope.result).unwrap_or_default();
                    return Err(BackendError::classify(&message));
                }
                Ok(envelope.result.unwrap_or_default())
            }
            Err(_) => Ok(stdout.trim().to_string()),
        }
    }
}

#[async_trait]
impl ModelBackend for CommandBackend {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        clog_debug!(
            "CommandBackend::generate binary={} prompt_len={}",
            self.binary.display(),
            prompt.len()
        );
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .args(&self.args)
                .arg(prompt)
                .current_dir(&self.cwd)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| BackendError::Timeout)?
        .map_err(|_| BackendError::Unavailable)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        clog_trace!("backend stdout: {}", stdout);

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                stdout.to_string()
            } else {
                stderr.to_string()
            };
            return Err(BackendError::classify(&message));
        }

        Self::parse_output(&stdout)
    }
}
