//! Per-path exclusive locks.
//!
//! The registry is an explicit object owned by the coordinator (and shared
//! only when several runs must not write the same files). Every release
//! bumps a generation counter on a `watch` channel so waiters can sleep
//! until something is freed instead of polling.

use crate::clog_debug;
use crate::core::{PlanId, TaskId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Owner of a lock: one task of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Holder {
    pub plan_id: PlanId,
    pub task_id: TaskId,
}

impl Holder {
    pub fn new(plan_id: PlanId, task_id: impl Into<TaskId>) -> Self {
        Self {
            plan_id,
            task_id: task_id.into(),
        }
    }
}

impl std::fmt::Display for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.task_id, self.plan_id.short())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub path: PathBuf,
    pub holder: Holder,
    pub acquired_at: DateTime<Utc>,
}

/// The first held path met by [`LockRegistry::acquire_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contention {
    pub path: PathBuf,
    pub holder: Holder,
}

#[derive(Clone)]
pub struct LockRegistry {
    locks: Arc<Mutex<HashMap<PathBuf, Lock>>>,
    released: Arc<watch::Sender<u64>>,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            released: Arc::new(tx),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, Lock>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.released.send_modify(|generation| *generation += 1);
    }

    /// Try to take `path` for `holder` without waiting.
    ///
    /// Returns false if a different holder has it. Re-acquiring a lock
    /// already held by `holder` succeeds.
    pub fn acquire(&self, path: &Path, holder: &Holder) -> bool {
        let mut table = self.table();
        Self::grant(&mut table, path, holder)
    }

    fn grant(table: &mut HashMap<PathBuf, Lock>, path: &Path, holder: &Holder) -> bool {
        match table.get(path) {
            Some(lock) => &lock.holder == holder,
            None => {
                table.insert(
                    path.to_path_buf(),
                    Lock {
                        path: path.to_path_buf(),
                        holder: holder.clone(),
                        acquired_at: Utc::now(),
                    },
                );
                true
            }
        }
    }

    /// Take every path in sorted order, or none of them.
    pub fn acquire_all<'a, I>(&self, paths: I, holder: &Holder) -> Result<(), Contention>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let ordered: BTreeSet<&Path> = paths.into_iter().collect();
        let mut table = self.table();
        let mut granted = Vec::new();

        for path in ordered {
            let newly = !table.contains_key(path);
            if Self::grant(&mut table, path, holder) {
                if newly {
                    granted.push(path);
                }
                continue;
            }
            let contention = Contention {
                path: path.to_path_buf(),
                holder: table[path].holder.clone(),
            };
            for taken in granted {
                table.remove(taken);
            }
            return Err(contention);
        }

        clog_debug!("Locks granted to {}", holder);
        Ok(())
    }

    /// Release `path` if `holder` has it; otherwise do nothing.
    pub fn release(&self, path: &Path, holder: &Holder) {
        let removed = {
            let mut table = self.table();
            match table.get(path) {
                Some(lock) if &lock.holder == holder => table.remove(path).is_some(),
                _ => false,
            }
        };
        if removed {
            self.notify();
        }
    }

    /// Release everything `holder` has. Returns the freed paths, sorted.
    pub fn release_all(&self, holder: &Holder) -> Vec<PathBuf> {
        let mut freed: Vec<PathBuf> = {
            let mut table = self.table();
            let paths: Vec<PathBuf> = table
                .values()
                .filter(|lock| &lock.holder == holder)
                .map(|lock| lock.path.clone())
                .collect();
            for path in &paths {
                table.remove(path);
            }
            paths
        };
        freed.sort();
        if !freed.is_empty() {
            clog_debug!("Released {} lock(s) held by {}", freed.len(), holder);
            self.notify();
        }
        freed
    }

    pub fn holder_of(&self, path: &Path) -> Option<Holder> {
        self.table().get(path).map(|lock| lock.holder.clone())
    }

    pub fn lock(&self, path: &Path) -> Option<Lock> {
        self.table().get(path).cloned()
    }

    /// Paths held by `holder`, sorted.
    pub fn held_by(&self, holder: &Holder) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .table()
            .values()
            .filter(|lock| &lock.holder == holder)
            .map(|lock| lock.path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Receiver that changes after every release.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.released.subscribe()
    }
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry").field("held", &self.len()).finish()
    }
}
