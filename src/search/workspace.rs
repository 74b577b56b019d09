use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::index::IndexSession;

/// Engine-side state for one workspace of the content source.
///
/// The session is created on first use and then reused. Holding the session lock is
/// what serializes index, optimize and search work on the workspace.
pub struct Workspace {
    name: String,
    modified_since_optimize: AtomicUsize,
    session: Mutex<Option<Box<dyn IndexSession>>>,
    last_optimized: Mutex<Option<DateTime<Utc>>>,
}

impl Workspace {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            modified_since_optimize: AtomicUsize::new(0),
            session: Mutex::new(None),
            last_optimized: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nodes indexed or removed since the last optimization.
    pub fn modified_since_optimize(&self) -> usize {
        self.modified_since_optimize.load(Ordering::SeqCst)
    }

    /// Add `changes` and return the new total.
    pub(crate) fn record_changes(&self, changes: usize) -> usize {
        self.modified_since_optimize.fetch_add(changes, Ordering::SeqCst) + changes
    }

    pub fn last_optimized(&self) -> Option<DateTime<Utc>> {
        *self.last_optimized.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mark_optimized(&self) {
        self.modified_since_optimize.store(0, Ordering::SeqCst);
        *self.last_optimized.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn has_session(&self) -> bool {
        self.lock_session().is_some()
    }

    pub(crate) fn lock_session(&self) -> MutexGuard<'_, Option<Box<dyn IndexSession>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("name", &self.name)
            .field("modified_since_optimize", &self.modified_since_optimize())
            .field("last_optimized", &self.last_optimized())
            .finish()
    }
}

/// Workspaces the engine has handed out, by name.
#[derive(Debug, Default)]
pub struct WorkspaceRegistry {
    workspaces: RwLock<HashMap<String, Arc<Workspace>>>,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Workspace>> {
        self.workspaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Existing workspace, or a new one registered under `name`.
    pub fn get_or_create(&self, name: &str) -> Arc<Workspace> {
        let mut workspaces = self.workspaces.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have registered it since the read lock was released.
        workspaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Workspace::new(name)))
            .clone()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Workspace>> {
        self.workspaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Register `workspace` again unless its name has been taken since it was removed.
    pub(crate) fn restore(&self, workspace: Arc<Workspace>) {
        self.workspaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(workspace.name.clone())
            .or_insert(workspace);
    }

    pub fn remove_all(&self) -> Vec<Arc<Workspace>> {
        let mut workspaces = self.workspaces.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed: Vec<Arc<Workspace>> = workspaces.drain().map(|(_, ws)| ws).collect();
        removed.sort_by(|a, b| a.name.cmp(&b.name));
        removed
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workspaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
