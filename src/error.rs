use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Plan-level defects that abort a run before anything is dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StructuralError {
    #[error("dependency cycle detected at task {task_id}")]
    CycleDetected { task_id: TaskId },

    #[error("task {task_id} depends on unknown task {dependency}")]
    UnknownDependency { task_id: TaskId, dependency: TaskId },

    #[error("task id {task_id} appears more than once")]
    DuplicateTask { task_id: TaskId },
}

pub type Result<T> = std::result::Result<T, Error>;
