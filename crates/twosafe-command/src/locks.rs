use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};

/// Path-keyed mutual exclusion.
///
/// At most one [`PathGuard`] exists per path at a time; guards for
/// different paths never wait on each other. A path is forgotten as soon as
/// its guard drops.
#[derive(Debug, Default)]
pub struct PathLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `path` is free, then hold it until the guard drops.
    pub fn lock(&self, path: impl AsRef<Path>) -> PathGuard<'_> {
        let path = path.as_ref().to_path_buf();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(&path) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(path.clone());
        PathGuard { locks: self, path }
    }

    /// Whether a guard is currently held for `path`.
    pub fn is_locked(&self, path: impl AsRef<Path>) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path.as_ref())
    }

    /// Number of paths currently held.
    pub fn len(&self) -> usize {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on one path; released on drop.
#[derive(Debug)]
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
}

impl PathGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.path);
        self.locks.released.notify_all();
    }
}
