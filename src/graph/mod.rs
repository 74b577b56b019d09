//! Content graph model: names, paths, properties and the read side of a content source.
//!
//! Sources expose workspaces of hierarchical nodes. The search engine only needs
//! workspace names and depth-bounded subgraph reads, captured by
//! [`RepositoryConnectionFactory`] and [`RepositoryConnection`].

mod change;
mod name;
mod path;
mod property;
mod store;
mod traversal;

pub use change::{group_by_workspace, Change};
pub use name::{Name, NoOpDecoder, TextDecoder, XmlNameDecoder};
pub use path::{Path, Segment};
pub use property::{Property, PropertyMap, Value};
pub use store::InMemoryRepository;
pub use traversal::walk_content;

use uuid::Uuid;

use crate::error::Result;

/// Identifies a node by path and, when known, by its uuid.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub path: Path,
    pub uuid: Option<Uuid>,
}

impl Location {
    pub fn new(path: Path, uuid: Option<Uuid>) -> Self {
        Self { path, uuid }
    }

    pub fn at(path: Path) -> Self {
        Self { path, uuid: None }
    }
}

/// A node read from a content source.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub location: Location,
    pub properties: Vec<Property>,
    pub children: Vec<Location>,
}

impl Node {
    pub fn path(&self) -> &Path {
        &self.location.path
    }

    pub fn property(&self, name: &Name) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == *name)
    }
}

/// Opens connections to named content sources.
pub trait RepositoryConnectionFactory: Send + Sync {
    fn create_connection(&self, source_name: &str) -> Result<Box<dyn RepositoryConnection>>;
}

/// Read access to one content source.
pub trait RepositoryConnection {
    fn workspace_names(&self) -> Result<Vec<String>>;

    /// Nodes at or below `path` whose relative depth is less than `depth`, in
    /// depth-first order. Each node lists all of its children, read or not.
    fn read_subgraph(&self, workspace: &str, path: &Path, depth: usize) -> Result<Vec<Node>>;
}
