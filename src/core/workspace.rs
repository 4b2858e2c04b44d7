//! Working-directory confinement.
//!
//! Every path a task names (target files, tool-call paths, criteria paths)
//! is normalised lexically against the working directory. Normalisation
//! never touches the filesystem, so it gives the same answer before and
//! after a file is created.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("path escapes the working directory: {path}")]
pub struct PathEscape {
    pub path: String,
}

/// The root every task operation is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalise `path` to a root-relative path.
    ///
    /// `.` components are dropped and `..` pops the previous component.
    /// Absolute paths are accepted only when they lie under the root.
    /// An empty result (the root itself) is returned as `.`.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, PathEscape> {
        let path = path.as_ref();
        let escape = || PathEscape {
            path: path.display().to_string(),
        };

        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).map_err(|_| escape())?
        } else {
            path
        };

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => parts.push(part),
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(escape());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }

        if parts.is_empty() {
            return Ok(PathBuf::from("."));
        }
        Ok(parts.iter().collect())
    }

    /// Resolve and join onto the root.
    pub fn absolute(&self, path: impl AsRef<Path>) -> Result<PathBuf, PathEscape> {
        let relative = self.resolve(path)?;
        Ok(self.root.join(relative))
    }
}
