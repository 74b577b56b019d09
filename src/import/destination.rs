use crate::context::ExecutionContext;
use crate::error::Result;
use crate::graph::{InMemoryRepository, Path, Property};

/// Sink for content built by an importer.
pub trait Destination {
    /// Context whose namespace registry receives namespaces found while importing.
    fn execution_context(&self) -> &ExecutionContext;

    /// Create a node with the given properties.
    fn create(&mut self, path: &Path, properties: Vec<Property>) -> Result<()>;

    /// Add properties to a node created earlier.
    fn set_properties(&mut self, path: &Path, properties: Vec<Property>) -> Result<()>;

    /// Flush outstanding work.
    fn submit(&mut self) -> Result<()>;
}

#[derive(Debug)]
enum Operation {
    Create { path: Path, properties: Vec<Property> },
    SetProperties { path: Path, properties: Vec<Property> },
}

/// Destination that buffers operations and applies them to one workspace of an
/// [`InMemoryRepository`] on `submit()`.
pub struct GraphDestination {
    repository: InMemoryRepository,
    workspace: String,
    context: ExecutionContext,
    pending: Vec<Operation>,
    applied: usize,
}

impl GraphDestination {
    pub fn new(repository: InMemoryRepository, workspace: impl Into<String>, context: ExecutionContext) -> Self {
        Self {
            repository,
            workspace: workspace.into(),
            context,
            pending: Vec::new(),
            applied: 0,
        }
    }

    pub fn pending_operations(&self) -> usize {
        self.pending.len()
    }

    /// Operations applied by earlier submits.
    pub fn applied_operations(&self) -> usize {
        self.applied
    }
}

impl Destination for GraphDestination {
    fn execution_context(&self) -> &ExecutionContext {
        &self.context
    }

    fn create(&mut self, path: &Path, properties: Vec<Property>) -> Result<()> {
        self.pending.push(Operation::Create {
            path: path.clone(),
            properties,
        });
        Ok(())
    }

    fn set_properties(&mut self, path: &Path, properties: Vec<Property>) -> Result<()> {
        self.pending.push(Operation::SetProperties {
            path: path.clone(),
            properties,
        });
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        let count = self.pending.len();
        for operation in self.pending.drain(..) {
            match operation {
                Operation::Create { path, properties } => {
                    self.repository.create_node(&self.workspace, &path, properties)?;
                }
                Operation::SetProperties { path, properties } => {
                    self.repository
                        .set_properties(&self.workspace, &path, properties)?;
                }
            }
        }
        self.applied += count;
        log::debug!(
            "Applied {} operations to workspace '{}'",
            count,
            self.workspace
        );
        Ok(())
    }
}
