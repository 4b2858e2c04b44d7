//! Success-criterion checks.
//!
//! Criteria are free text. The ones that follow a small grammar are turned
//! into observable checks (file existence, file content, command result);
//! everything else is advisory and holds when every tool call succeeded.

use crate::adapters::{ToolCall, ToolError, ToolHost, ToolOutput};
use crate::core::{Task, TaskError, Workspace};
use crate::clog_debug;
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

const PATH: &str = r#"(?P<path>`[^`]+`|"[^"]+"|'[^']+'|[^\s`'"]*[./][^\s`'"]*)"#;
const QUOTED: &str = r#"(?P<text>`[^`]*`|"[^"]*"|'[^']*')"#;
const COMMAND: &str = r"(?:the\s+)?command\s+`(?P<command>[^`]+)`";

static EXISTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:the\s+)?(?:file\s+)?{PATH}\s+(?:exists|is\s+created|was\s+created)$"
    ))
    .expect("valid criterion regex")
});

static CONTAINS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^(?:the\s+)?(?:file\s+)?{PATH}\s+contains\s+{QUOTED}$"))
        .expect("valid criterion regex")
});

static MATCHES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^(?:the\s+)?(?:file\s+)?{PATH}\s+matches\s+/(?P<pattern>.+)/$"))
        .expect("valid criterion regex")
});

static SUCCEEDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^{COMMAND}\s+(?:succeeds|passes|exits\s+(?:with\s+)?(?:code\s+)?0)$"
    ))
    .expect("valid criterion regex")
});

static OUTPUTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^{COMMAND}\s+(?:outputs|prints)\s+{QUOTED}$"))
        .expect("valid criterion regex")
});

fn unquote(s: &str) -> String {
    let trimmed = s
        .strip_prefix(['`', '"', '\''])
        .and_then(|rest| rest.strip_suffix(['`', '"', '\'']));
    trimmed.unwrap_or(s).to_string()
}

/// A parsed success criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    FileExists { path: String },
    FileContains { path: String, text: String },
    FileMatches { path: String, pattern: String },
    CommandSucceeds { command: String },
    CommandOutputs { command: String, text: String },
    Advisory(String),
}

impl Criterion {
    pub fn parse(criterion: &str) -> Self {
        let text = criterion.trim();
        let text = text.strip_suffix('.').unwrap_or(text).trim();

        if let Some(caps) = CONTAINS_RE.captures(text) {
            return Criterion::FileContains {
                path: unquote(&caps["path"]),
                text: unquote(&caps["text"]),
            };
        }
        if let Some(caps) = MATCHES_RE.captures(text) {
            return Criterion::FileMatches {
                path: unquote(&caps["path"]),
                pattern: caps["pattern"].to_string(),
            };
        }
        if let Some(caps) = EXISTS_RE.captures(text) {
            return Criterion::FileExists {
                path: unquote(&caps["path"]),
            };
        }
        if let Some(caps) = SUCCEEDS_RE.captures(text) {
            return Criterion::CommandSucceeds {
                command: caps["command"].to_string(),
            };
        }
        if let Some(caps) = OUTPUTS_RE.captures(text) {
            return Criterion::CommandOutputs {
                command: caps["command"].to_string(),
                text: unquote(&caps["text"]),
            };
        }
        Criterion::Advisory(criterion.trim().to_string())
    }

    pub fn is_advisory(&self) -> bool {
        matches!(self, Criterion::Advisory(_))
    }
}

/// What a worker observed while running a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedEffects {
    /// Normalised paths written, in call order.
    pub modified_paths: Vec<PathBuf>,
    pub calls_made: usize,
    /// Calls that failed with an error the worker did not tolerate.
    pub calls_failed: usize,
    pub transcript: String,
}

impl ObservedEffects {
    pub fn all_calls_succeeded(&self) -> bool {
        self.calls_failed == 0
    }
}

/// Checks criteria through the tool host.
pub struct Verifier {
    workspace: Workspace,
    host: Arc<dyn ToolHost>,
    command_timeout: Duration,
}

impl Verifier {
    pub fn new(workspace: Workspace, host: Arc<dyn ToolHost>) -> Self {
        Self {
            workspace,
            host,
            command_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Check every criterion in order; the first unmet one is the error.
    pub async fn check(&self, task: &Task, observed: &ObservedEffects) -> Result<(), TaskError> {
        for criterion in &task.success_criteria {
            let parsed = Criterion::parse(criterion);
            if !self.holds(&parsed, observed).await {
                clog_debug!("Task {} unmet criterion: {}", task.id, criterion);
                return Err(TaskError::Verification {
                    criterion: criterion.clone(),
                });
            }
        }
        Ok(())
    }

    pub async fn verify(&self, task: &Task, observed: &ObservedEffects) -> bool {
        self.check(task, observed).await.is_ok()
    }

    async fn holds(&self, criterion: &Criterion, observed: &ObservedEffects) -> bool {
        match criterion {
            Criterion::Advisory(_) => observed.all_calls_succeeded(),
            Criterion::FileExists { path } => self.exists(path, observed).await,
            Criterion::FileContains { path, text } => self
                .read(path)
                .await
                .is_some_and(|content| content.contains(text.as_str())),
            Criterion::FileMatches { path, pattern } => {
                let Ok(re) = Regex::new(pattern) else {
                    return false;
                };
                self.read(path).await.is_some_and(|content| re.is_match(&content))
            }
            Criterion::CommandSucceeds { command } => self.run(command).await.is_some(),
            Criterion::CommandOutputs { command, text } => self
                .run(command)
                .await
                .is_some_and(|stdout| stdout.contains(text.as_str())),
        }
    }

    async fn exists(&self, path: &str, observed: &ObservedEffects) -> bool {
        let Ok(normalised) = self.workspace.resolve(path) else {
            return false;
        };
        if observed.modified_paths.contains(&normalised) {
            return true;
        }
        let as_file = ToolCall::ReadFile {
            path: path.to_string(),
        };
        let as_dir = ToolCall::ListFiles {
            path: path.to_string(),
        };
        match self.host.invoke(&as_file).await {
            Ok(_) => true,
            Err(ToolError::NotFound { .. }) | Err(ToolError::PathEscape { .. }) => false,
            Err(_) => self.host.invoke(&as_dir).await.is_ok(),
        }
    }

    async fn read(&self, path: &str) -> Option<String> {
        self.workspace.resolve(path).ok()?;
        match self
            .host
            .invoke(&ToolCall::ReadFile {
                path: path.to_string(),
            })
            .await
        {
            Ok(ToolOutput::Content { text }) => Some(text),
            _ => None,
        }
    }

    /// Stdout of a successful command run.
    async fn run(&self, command: &str) -> Option<String> {
        let call = ToolCall::ExecuteCommand {
            command: command.to_string(),
            timeout_secs: Some(self.command_timeout.as_secs().max(1)),
        };
        match tokio::time::timeout(self.command_timeout, self.host.invoke(&call)).await {
            Ok(Ok(ToolOutput::Command { stdout, .. })) => Some(stdout),
            _ => None,
        }
    }
}
