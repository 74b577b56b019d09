//! SQLite index layout: one database per source workspace holding a paths index, a typed
//! content index and an FTS5 full-text index.

mod migrate;
mod session;

pub use migrate::{get_applied_migrations, run_migrations};
pub use session::SqliteIndexSession;

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::layout::{IndexLayout, IndexSession};
use super::rules::IndexRules;
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::error::{RepographError, Result};
use crate::namespace::{EncodingNamespaceRegistry, DEFAULT_HASH_LENGTH, JCR_URI, MIX_URI, NT_URI, RG_URI};

/// Open a connection with the layout's pragmas.
///
/// File-backed databases use WAL with NORMAL sync; every connection enforces foreign keys
/// so property rows follow their node.
pub fn open_connection(path: Option<&Path>) -> Result<Connection> {
    let conn = match path {
        Some(path) => {
            let conn = Connection::open(path).map_err(RepographError::Database)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL; \
                 PRAGMA synchronous = NORMAL; \
                 PRAGMA foreign_keys = ON; \
                 PRAGMA temp_store = MEMORY; \
                 PRAGMA cache_size = -16384; \
                 PRAGMA wal_autocheckpoint = 1000;",
            )?;
            conn
        }
        None => {
            let conn = Connection::open_in_memory().map_err(RepographError::Database)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn
        }
    };
    Ok(conn)
}

const FILE_DIGEST_LENGTH: usize = 12;

/// File-name-safe form of a source or workspace name.
///
/// The readable part maps everything outside `[A-Za-z0-9_]` to `_`; the suffix is a
/// digest of the exact name, so distinct names never share a file.
fn file_component(name: &str) -> String {
    let readable: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", readable, &digest[..FILE_DIGEST_LENGTH])
}

/// Index layout backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteIndexLayout {
    directory: Option<PathBuf>,
    rules: IndexRules,
    hash_length: usize,
    fixed_namespaces: Vec<String>,
}

impl SqliteIndexLayout {
    /// Every session gets its own in-memory database.
    pub fn in_memory(rules: IndexRules) -> Self {
        Self {
            directory: None,
            rules,
            hash_length: DEFAULT_HASH_LENGTH,
            fixed_namespaces: default_fixed_namespaces(),
        }
    }

    /// Databases live at `<directory>/<source>/<workspace>.db`.
    pub fn on_disk(directory: impl Into<PathBuf>, rules: IndexRules) -> Self {
        Self {
            directory: Some(directory.into()),
            ..Self::in_memory(rules)
        }
    }

    /// Layout described by the `[index]` and `[namespaces]` configuration sections.
    pub fn from_config(config: &Config, rules: IndexRules) -> Self {
        let layout = match config.index_directory() {
            Some(directory) => Self::on_disk(directory, rules),
            None => Self::in_memory(rules),
        };
        layout.with_namespace_encoding(config.namespaces.hash_length, config.namespaces.fixed.clone())
    }

    pub fn with_namespace_encoding(mut self, hash_length: usize, fixed: Vec<String>) -> Self {
        self.hash_length = hash_length;
        self.fixed_namespaces = fixed;
        self
    }

    pub fn rules(&self) -> &IndexRules {
        &self.rules
    }

    /// Database file for a workspace, or `None` for in-memory layouts.
    pub fn database_path(&self, source_name: &str, workspace_name: &str) -> Option<PathBuf> {
        self.directory.as_ref().map(|directory| {
            directory
                .join(file_component(source_name))
                .join(format!("{}.db", file_component(workspace_name)))
        })
    }
}

fn default_fixed_namespaces() -> Vec<String> {
    [JCR_URI, NT_URI, MIX_URI, RG_URI]
        .iter()
        .map(|uri| uri.to_string())
        .collect()
}

impl IndexLayout for SqliteIndexLayout {
    fn create_session(
        &self,
        context: &ExecutionContext,
        source_name: &str,
        workspace_name: &str,
        read_only: bool,
        create_if_missing: bool,
    ) -> Result<Box<dyn IndexSession>> {
        let path = self.database_path(source_name, workspace_name);
        if let Some(path) = &path {
            if !path.exists() {
                if !create_if_missing {
                    return Err(RepographError::Search(format!(
                        "no indexes for workspace '{}' of source '{}'",
                        workspace_name, source_name
                    )));
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let mut conn = open_connection(path.as_deref())?;
        run_migrations(&mut conn)?;

        let encoding = Arc::new(EncodingNamespaceRegistry::new(
            context.namespace_registry().clone(),
            self.hash_length,
            self.fixed_namespaces.clone(),
        ));
        log::info!(
            "Opened {} index session for workspace '{}' of source '{}'",
            if path.is_some() { "file" } else { "in-memory" },
            workspace_name,
            source_name
        );
        Ok(Box::new(SqliteIndexSession::new(
            conn,
            workspace_name,
            self.rules.clone(),
            encoding,
            read_only,
        )))
    }

    fn destroy_indexes(
        &self,
        _context: &ExecutionContext,
        source_name: &str,
        workspace_name: &str,
    ) -> Result<bool> {
        let Some(path) = self.database_path(source_name, workspace_name) else {
            return Ok(false);
        };
        let mut removed = false;
        for suffix in ["", "-wal", "-shm"] {
            let file = PathBuf::from(format!("{}{}", path.display(), suffix));
            if file.exists() {
                std::fs::remove_file(&file)?;
                removed = true;
            }
        }
        if removed {
            log::info!(
                "Destroyed indexes for workspace '{}' of source '{}'",
                workspace_name,
                source_name
            );
        }
        Ok(removed)
    }
}
