use std::sync::Arc;

use super::workspace::{Workspace, WorkspaceRegistry};
use crate::config::IndexConfig;
use crate::context::ExecutionContext;
use crate::error::{RepographError, Result};
use crate::graph::{
    group_by_workspace, walk_content, Change, Path, RepositoryConnection,
    RepositoryConnectionFactory,
};
use crate::index::{IndexLayout, IndexSession};
use crate::query::{parse_sql, Query, QueryContext, QueryResults, Schemata};

/// Engine behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEngineConfig {
    /// Check workspace names against the content source before using them.
    pub verify_workspaces: bool,
    /// Levels fetched per subgraph read while indexing.
    pub depth_per_read: usize,
    /// Optimize automatically once this many nodes changed (0 disables).
    pub max_changes_before_optimize: usize,
}

impl Default for SearchEngineConfig {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl SearchEngineConfig {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            verify_workspaces: config.verify_workspaces,
            depth_per_read: config.depth_per_read,
            max_changes_before_optimize: config.max_changes_before_optimize,
        }
    }
}

/// Keeps the indexes of one content source in step with its content and answers
/// full-text and structured queries against them.
///
/// Each workspace gets its own [`IndexSession`] from the [`IndexLayout`], created the first
/// time the workspace is used. Every operation on a workspace is one unit of work: the
/// session is committed once at the end, or rolled back if any step failed.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use repograph::{ExecutionContext, InMemoryRepository, IndexRules, SearchEngine, SearchEngineConfig, SqliteIndexLayout};
///
/// # fn example() -> repograph::Result<()> {
/// let source = InMemoryRepository::new("cars");
/// source.create_workspace("default")?;
/// let engine = SearchEngine::new(
///     "cars",
///     Arc::new(source),
///     Arc::new(SqliteIndexLayout::in_memory(IndexRules::default_rules())),
///     SearchEngineConfig::default(),
/// );
/// engine.index_workspace("default", 10)?;
/// let results = engine.full_text_search(&ExecutionContext::new(), "default", "toyota", 10, 0)?;
/// for path in results.paths() {
///     println!("{}", path);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SearchEngine {
    source_name: String,
    context: ExecutionContext,
    connection_factory: Arc<dyn RepositoryConnectionFactory>,
    layout: Arc<dyn IndexLayout>,
    config: SearchEngineConfig,
    workspaces: WorkspaceRegistry,
}

impl SearchEngine {
    pub fn new(
        source_name: impl Into<String>,
        connection_factory: Arc<dyn RepositoryConnectionFactory>,
        layout: Arc<dyn IndexLayout>,
        config: SearchEngineConfig,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            context: ExecutionContext::new(),
            connection_factory,
            layout,
            config,
            workspaces: WorkspaceRegistry::new(),
        }
    }

    /// Use `context` when opening index sessions.
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn config(&self) -> &SearchEngineConfig {
        &self.config
    }

    /// Names of the workspaces this engine has used so far.
    pub fn workspace_names(&self) -> Vec<String> {
        self.workspaces.names()
    }

    fn connection(&self) -> Result<Box<dyn RepositoryConnection>> {
        self.connection_factory.create_connection(&self.source_name)
    }

    /// The engine state for `name`, registering it on first use.
    ///
    /// Unknown workspaces fail with [`RepographError::InvalidWorkspace`] before any index
    /// session exists for them.
    pub fn get_workspace(&self, name: &str) -> Result<Arc<Workspace>> {
        if name.is_empty() {
            return Err(RepographError::InvalidArgument(
                "workspace name must not be empty".to_string(),
            ));
        }
        if let Some(workspace) = self.workspaces.get(name) {
            return Ok(workspace);
        }
        if self.config.verify_workspaces {
            let names = self.connection()?.workspace_names()?;
            if !names.iter().any(|existing| existing == name) {
                return Err(RepographError::InvalidWorkspace {
                    workspace: name.to_string(),
                    source_name: self.source_name.clone(),
                });
            }
        }
        Ok(self.workspaces.get_or_create(name))
    }

    /// Run `activity` against the workspace's session and finish the unit of work.
    ///
    /// `activity` returns its value and the number of nodes it changed. Changes count toward
    /// automatic optimization, which runs before the commit.
    fn execute<T>(
        &self,
        workspace: &Workspace,
        activity: impl FnOnce(&mut dyn IndexSession) -> Result<(T, usize)>,
    ) -> Result<T> {
        let mut guard = workspace.lock_session();
        if guard.is_none() {
            let session = self.layout.create_session(
                &self.context,
                &self.source_name,
                workspace.name(),
                false,
                true,
            )?;
            *guard = Some(session);
        }
        let session = guard.as_deref_mut().ok_or_else(|| {
            RepographError::StateViolation(format!(
                "no index session for workspace '{}'",
                workspace.name()
            ))
        })?;

        let outcome = match activity(&mut *session) {
            Ok((value, changes)) => self
                .optimize_if_needed(workspace, &mut *session, changes)
                .map(|optimized| (value, optimized)),
            Err(err) => Err(err),
        };

        match outcome {
            Ok((value, optimized)) => {
                session.commit()?;
                if optimized {
                    workspace.mark_optimized();
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback() {
                    log::warn!(
                        "Rollback failed for workspace '{}' of source '{}': {}",
                        workspace.name(),
                        self.source_name,
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    fn optimize_if_needed(
        &self,
        workspace: &Workspace,
        session: &mut dyn IndexSession,
        changes: usize,
    ) -> Result<bool> {
        if changes == 0 {
            return Ok(false);
        }
        let total = workspace.record_changes(changes);
        let max_changes = self.config.max_changes_before_optimize;
        if max_changes == 0 || total < max_changes {
            return Ok(false);
        }
        log::info!(
            "{} changes in workspace '{}' since the last optimization; optimizing",
            total,
            workspace.name()
        );
        session.optimize()?;
        Ok(true)
    }

    /// Reindex the whole workspace. Returns the number of nodes indexed.
    pub fn index_workspace(&self, workspace_name: &str, depth_per_read: usize) -> Result<usize> {
        self.index(workspace_name, &Path::root(), depth_per_read)
    }

    /// Reindex everything at or below `path`, replacing the entries already there.
    ///
    /// Content is read `depth_per_read` levels at a time. The session is committed once,
    /// after the last node.
    pub fn index(&self, workspace_name: &str, path: &Path, depth_per_read: usize) -> Result<usize> {
        let workspace = self.get_workspace(workspace_name)?;
        let connection = self.connection()?;
        log::info!(
            "Indexing {} in workspace '{}' of source '{}'",
            path,
            workspace_name,
            self.source_name
        );

        let indexed = self.execute(&workspace, |session| {
            let removed = session.delete_below(path)?;
            let indexed = walk_content(
                connection.as_ref(),
                workspace_name,
                path,
                depth_per_read,
                |node| session.index(node),
            )?;
            Ok((indexed, removed + indexed))
        })?;

        log::info!(
            "Indexed {} nodes in workspace '{}' of source '{}'",
            indexed,
            workspace_name,
            self.source_name
        );
        Ok(indexed)
    }

    /// Apply content changes to the indexes of the workspaces they touch.
    ///
    /// Changes are grouped by workspace and each group is one unit of work, applied in its
    /// original order and committed once. Every workspace is resolved before any group is
    /// applied, so an unknown workspace leaves all indexes untouched. Returns the number of
    /// index entries written or removed.
    pub fn index_changes(&self, changes: &[Change]) -> Result<usize> {
        let groups = group_by_workspace(changes);
        let mut batches = Vec::with_capacity(groups.len());
        for (name, group) in groups {
            batches.push((self.get_workspace(&name)?, group));
        }

        let mut total = 0;
        for (workspace, group) in &batches {
            let applied = self.execute(workspace, |session| {
                let applied = session.apply(group)?;
                Ok((applied, applied))
            })?;
            log::debug!(
                "Applied {} changes ({} index entries) to workspace '{}' of source '{}'",
                group.len(),
                applied,
                workspace.name(),
                self.source_name
            );
            total += applied;
        }
        Ok(total)
    }

    /// Reindex every workspace in the source, using the configured read depth.
    pub fn index_all(&self) -> Result<usize> {
        let mut total = 0;
        for name in self.connection()?.workspace_names()? {
            total += self.index_workspace(&name, self.config.depth_per_read)?;
        }
        Ok(total)
    }

    /// Compact the workspace's indexes and commit.
    pub fn optimize(&self, workspace_name: &str) -> Result<()> {
        let workspace = self.get_workspace(workspace_name)?;
        self.execute(&workspace, |session| {
            session.optimize()?;
            Ok(((), 0))
        })?;
        workspace.mark_optimized();
        Ok(())
    }

    /// Optimize every workspace in the source.
    pub fn optimize_all(&self) -> Result<()> {
        for name in self.connection()?.workspace_names()? {
            self.optimize(&name)?;
        }
        Ok(())
    }

    /// Ranked full-text search over one workspace.
    ///
    /// # Arguments
    ///
    /// * `context` - Context for interpreting the results
    /// * `workspace_name` - Workspace to search
    /// * `expression` - Search terms; any term may match
    /// * `max_results` - Maximum number of rows returned
    /// * `offset` - Number of leading rows skipped (0-based)
    pub fn full_text_search(
        &self,
        context: &ExecutionContext,
        workspace_name: &str,
        expression: &str,
        max_results: usize,
        offset: usize,
    ) -> Result<QueryResults> {
        let workspace = self.get_workspace(workspace_name)?;
        self.execute(&workspace, |session| {
            let results = session.search(context, expression, max_results, offset)?;
            Ok((results, 0))
        })
    }

    /// Evaluate a structured query over one workspace, resolving tables through `schemata`.
    pub fn query(
        &self,
        context: &ExecutionContext,
        workspace_name: &str,
        query: &Query,
        schemata: Arc<dyn Schemata>,
    ) -> Result<QueryResults> {
        let workspace = self.get_workspace(workspace_name)?;
        let query_context = QueryContext::new(context.clone(), schemata);
        self.execute(&workspace, |session| {
            let results = session.query(&query_context, query)?;
            Ok((results, 0))
        })
    }

    /// Parse `sql` and run it with [`SearchEngine::query`].
    pub fn query_sql(
        &self,
        context: &ExecutionContext,
        workspace_name: &str,
        sql: &str,
        schemata: Arc<dyn Schemata>,
    ) -> Result<QueryResults> {
        let query = parse_sql(sql, context)?;
        self.query(context, workspace_name, &query, schemata)
    }

    /// Drop the indexes of a workspace this engine has used. Returns whether anything was
    /// removed; unknown workspaces are left alone without touching the layout.
    pub fn remove_workspace(&self, workspace_name: &str) -> Result<bool> {
        if workspace_name.is_empty() {
            return Err(RepographError::InvalidArgument(
                "workspace name must not be empty".to_string(),
            ));
        }
        match self.workspaces.remove(workspace_name) {
            Some(workspace) => {
                self.destroy(workspace)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop the indexes of every workspace this engine has used. Returns how many.
    ///
    /// On failure the failed workspace and those not yet reached stay registered.
    pub fn remove_workspaces(&self) -> Result<usize> {
        let mut pending = self.workspaces.remove_all().into_iter();
        let mut removed = 0;
        while let Some(workspace) = pending.next() {
            if let Err(err) = self.destroy(workspace) {
                for workspace in pending {
                    self.workspaces.restore(workspace);
                }
                return Err(err);
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Destroy the indexes of a workspace already taken out of the registry. A failed
    /// destroy puts it back so the removal can be retried.
    fn destroy(&self, workspace: Arc<Workspace>) -> Result<()> {
        // Close the session before its storage goes away.
        workspace.lock_session().take();
        if let Err(err) =
            self.layout
                .destroy_indexes(&self.context, &self.source_name, workspace.name())
        {
            log::warn!(
                "Failed to remove indexes for workspace '{}' of source '{}': {}",
                workspace.name(),
                self.source_name,
                err
            );
            self.workspaces.restore(workspace);
            return Err(err);
        }
        log::info!(
            "Removed workspace '{}' of source '{}' from the search engine",
            workspace.name(),
            self.source_name
        );
        Ok(())
    }
}
