use crate::context::ExecutionContext;
use crate::error::Result;
use crate::graph::{Change, Node, Path};
use crate::query::{Query, QueryContext, QueryResults};

/// Creates and destroys the per-workspace indexes of a content source.
pub trait IndexLayout: Send + Sync {
    /// Open a session on the indexes of one workspace.
    ///
    /// With `create_if_missing` unset, a workspace without indexes is an error.
    fn create_session(
        &self,
        context: &ExecutionContext,
        source_name: &str,
        workspace_name: &str,
        read_only: bool,
        create_if_missing: bool,
    ) -> Result<Box<dyn IndexSession>>;

    /// Permanently remove the workspace's index state. Returns whether anything was removed.
    fn destroy_indexes(
        &self,
        context: &ExecutionContext,
        source_name: &str,
        workspace_name: &str,
    ) -> Result<bool>;
}

/// Unit of work against one workspace's indexes.
///
/// Writes become durable on `commit()`. A session is used by one caller at a time.
pub trait IndexSession: Send {
    fn workspace_name(&self) -> &str;

    /// Add or replace the entry for `node`.
    fn index(&mut self, node: &Node) -> Result<()>;

    /// Remove the entries at and below `path`, returning how many were removed.
    fn delete_below(&mut self, path: &Path) -> Result<usize>;

    /// Compact the indexes. Only durable after the following `commit()`.
    fn optimize(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether there is uncommitted work.
    fn has_changes(&self) -> bool;

    /// Ranked full-text search. Rows carry a score and no columns.
    fn search(
        &mut self,
        context: &ExecutionContext,
        full_text: &str,
        max_results: usize,
        offset: usize,
    ) -> Result<QueryResults>;

    fn query(&mut self, context: &QueryContext, query: &Query) -> Result<QueryResults>;

    /// Bring the indexes up to date with `changes`, in order. Returns the number of index
    /// entries written or removed.
    fn apply(&mut self, changes: &[Change]) -> Result<usize> {
        let mut applied = 0;
        for change in changes {
            applied += match change {
                Change::CreateNode { node, .. } | Change::SetProperties { node, .. } => {
                    self.index(node)?;
                    1
                }
                Change::DeleteSubtree { path, .. } => self.delete_below(path)?,
            };
        }
        Ok(applied)
    }
}
