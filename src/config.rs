use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{clog_debug, clog_warn, Error, Result};

/// Command used to reach the model backend when none is configured.
pub const DEFAULT_BACKEND_COMMAND: &str = "claude -p --output-format json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of workers running at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Upper bound on the number of tasks the planner may produce.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    /// Extra attempts for transient backend errors before falling back.
    #[serde(default)]
    pub backend_retries: u32,
    pub backend_command: Option<String>,
    pub working_dir: Option<String>,
}

fn default_max_workers() -> usize {
    4
}

fn default_max_tasks() -> usize {
    6
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_backend_timeout_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_tasks: default_max_tasks(),
            task_timeout_secs: default_task_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            backend_timeout_secs: default_backend_timeout_secs(),
            backend_retries: 0,
            backend_command: None,
            working_dir: None,
        }
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    pub fn effective_command(&self) -> &str {
        self.backend_command
            .as_deref()
            .unwrap_or(DEFAULT_BACKEND_COMMAND)
    }

    /// Working directory for tool execution, defaulting to the process cwd.
    pub fn effective_working_dir(&self) -> Result<PathBuf> {
        match &self.working_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(std::env::current_dir()?),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// Load `~/.conductor/conductor.toml`, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        clog_debug!(
            "Config loaded: max_workers={}, max_tasks={}, task_timeout={}s, command={:?}",
            config.max_workers,
            config.max_tasks,
            config.task_timeout_secs,
            config.backend_command
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::conductor_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Apply `CONDUCTOR_*` overrides read through `lookup`.
    ///
    /// Values that do not parse are skipped with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CONDUCTOR_MAX_WORKERS") {
            match v.trim().parse() {
                Ok(n) => self.max_workers = n,
                Err(_) => clog_warn!("Ignoring CONDUCTOR_MAX_WORKERS={:?}", v),
            }
        }
        if let Some(v) = lookup("CONDUCTOR_MAX_TASKS") {
            match v.trim().parse() {
                Ok(n) => self.max_tasks = n,
                Err(_) => clog_warn!("Ignoring CONDUCTOR_MAX_TASKS={:?}", v),
            }
        }
        if let Some(v) = lookup("CONDUCTOR_TASK_TIMEOUT") {
            match v.trim().parse() {
                Ok(n) => self.task_timeout_secs = n,
                Err(_) => clog_warn!("Ignoring CONDUCTOR_TASK_TIMEOUT={:?}", v),
            }
        }
        if let Some(v) = lookup("CONDUCTOR_BACKEND_COMMAND") {
            if !v.trim().is_empty() {
                self.backend_command = Some(v);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }
        if self.max_tasks == 0 {
            return Err(Error::Config("max_tasks must be at least 1".to_string()));
        }
        if self.task_timeout_secs == 0 || self.tool_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.backend_timeout_secs == 0 {
            return Err(Error::Config("backend_timeout_secs must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
