use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

use super::{Change, Location, Node, Path, Property, RepositoryConnection, RepositoryConnectionFactory};
use crate::error::{RepographError, Result};

#[derive(Debug)]
struct NodeRecord {
    uuid: Uuid,
    properties: Vec<Property>,
    children: Vec<Path>,
}

impl NodeRecord {
    fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    fn merge(&mut self, properties: Vec<Property>) {
        for property in properties {
            match self.properties.iter_mut().find(|p| p.name == property.name) {
                Some(existing) => *existing = property,
                None => self.properties.push(property),
            }
        }
    }
}

#[derive(Debug)]
struct WorkspaceContent {
    nodes: HashMap<Path, NodeRecord>,
}

impl WorkspaceContent {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(Path::root(), NodeRecord::new());
        Self { nodes }
    }

    /// Current state of the node at `path`, which must exist.
    fn snapshot(&self, path: &Path) -> Node {
        match self.nodes.get(path) {
            Some(record) => self.to_node(path, record),
            None => Node {
                location: Location::at(path.clone()),
                properties: Vec::new(),
                children: Vec::new(),
            },
        }
    }

    fn to_node(&self, path: &Path, record: &NodeRecord) -> Node {
        Node {
            location: Location::new(path.clone(), Some(record.uuid)),
            properties: record.properties.clone(),
            children: record
                .children
                .iter()
                .map(|child| {
                    let uuid = self.nodes.get(child).map(|r| r.uuid);
                    Location::new(child.clone(), uuid)
                })
                .collect(),
        }
    }
}

/// Content source holding every workspace in memory.
///
/// Cloning yields another handle to the same content. When change recording is on, every
/// node mutation is also journaled as a [`Change`] for the indexes to pick up.
#[derive(Debug, Clone)]
pub struct InMemoryRepository {
    name: String,
    workspaces: Arc<RwLock<HashMap<String, WorkspaceContent>>>,
    changes: Arc<Mutex<Option<Vec<Change>>>>,
}

impl InMemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspaces: Arc::new(RwLock::new(HashMap::new())),
            changes: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Turn change recording on or off. Turning it off discards unclaimed changes.
    pub fn record_changes(&self, enabled: bool) {
        let mut changes = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
        match (enabled, changes.is_some()) {
            (true, false) => *changes = Some(Vec::new()),
            (false, _) => *changes = None,
            _ => {}
        }
    }

    /// Changes recorded since the last call, oldest first.
    pub fn take_changes(&self) -> Vec<Change> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn journal(&self, change: impl FnOnce() -> Change) {
        let mut changes = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(changes) = changes.as_mut() {
            changes.push(change());
        }
    }

    /// Create an empty workspace with a root node. Returns false if it already existed.
    pub fn create_workspace(&self, workspace: &str) -> Result<bool> {
        if workspace.is_empty() {
            return Err(RepographError::InvalidArgument(
                "workspace name must not be empty".to_string(),
            ));
        }
        let mut workspaces = self.workspaces.write().unwrap_or_else(PoisonError::into_inner);
        if workspaces.contains_key(workspace) {
            return Ok(false);
        }
        workspaces.insert(workspace.to_string(), WorkspaceContent::new());
        log::debug!("Created workspace '{}' in source '{}'", workspace, self.name);
        Ok(true)
    }

    fn invalid_workspace(&self, workspace: &str) -> RepographError {
        RepographError::InvalidWorkspace {
            workspace: workspace.to_string(),
            source_name: self.name.clone(),
        }
    }

    /// Create the node at `path`, or merge `properties` into it if it already exists.
    /// The parent must exist.
    pub fn create_node(&self, workspace: &str, path: &Path, properties: Vec<Property>) -> Result<Uuid> {
        let mut workspaces = self.workspaces.write().unwrap_or_else(PoisonError::into_inner);
        let content = workspaces
            .get_mut(workspace)
            .ok_or_else(|| self.invalid_workspace(workspace))?;

        if let Some(existing) = content.nodes.get_mut(path) {
            existing.merge(properties);
            let uuid = existing.uuid;
            self.journal(|| Change::SetProperties {
                workspace: workspace.to_string(),
                node: content.snapshot(path),
            });
            return Ok(uuid);
        }
        let parent = path
            .parent()
            .ok_or_else(|| RepographError::NodeNotFound(path.to_string()))?;
        let parent_record = content
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| RepographError::NodeNotFound(parent.to_string()))?;
        parent_record.children.push(path.clone());

        let mut record = NodeRecord::new();
        record.merge(properties);
        let uuid = record.uuid;
        content.nodes.insert(path.clone(), record);
        self.journal(|| Change::CreateNode {
            workspace: workspace.to_string(),
            node: content.snapshot(path),
        });
        Ok(uuid)
    }

    /// Replace the named properties on an existing node.
    pub fn set_properties(&self, workspace: &str, path: &Path, properties: Vec<Property>) -> Result<()> {
        let mut workspaces = self.workspaces.write().unwrap_or_else(PoisonError::into_inner);
        let content = workspaces
            .get_mut(workspace)
            .ok_or_else(|| self.invalid_workspace(workspace))?;
        let record = content
            .nodes
            .get_mut(path)
            .ok_or_else(|| RepographError::NodeNotFound(path.to_string()))?;
        record.merge(properties);
        self.journal(|| Change::SetProperties {
            workspace: workspace.to_string(),
            node: content.snapshot(path),
        });
        Ok(())
    }

    /// Delete the node at `path` and everything below it. Deleting the root only
    /// removes its children and properties. Returns the number of removed nodes.
    pub fn delete_subtree(&self, workspace: &str, path: &Path) -> Result<usize> {
        let mut workspaces = self.workspaces.write().unwrap_or_else(PoisonError::into_inner);
        let content = workspaces
            .get_mut(workspace)
            .ok_or_else(|| self.invalid_workspace(workspace))?;
        if !content.nodes.contains_key(path) {
            return Err(RepographError::NodeNotFound(path.to_string()));
        }

        if path.is_root() {
            let removed = content.nodes.len() - 1;
            *content = WorkspaceContent::new();
            self.journal(|| Change::DeleteSubtree {
                workspace: workspace.to_string(),
                path: Path::root(),
            });
            // The root itself survives, emptied.
            self.journal(|| Change::CreateNode {
                workspace: workspace.to_string(),
                node: content.snapshot(&Path::root()),
            });
            return Ok(removed);
        }

        let doomed: Vec<Path> = content
            .nodes
            .keys()
            .filter(|candidate| candidate.is_at_or_below(path))
            .cloned()
            .collect();
        for candidate in &doomed {
            content.nodes.remove(candidate);
        }
        if let Some(parent) = path.parent().and_then(|p| content.nodes.get_mut(&p)) {
            parent.children.retain(|child| child != path);
        }
        self.journal(|| Change::DeleteSubtree {
            workspace: workspace.to_string(),
            path: path.clone(),
        });
        Ok(doomed.len())
    }

    pub fn node(&self, workspace: &str, path: &Path) -> Result<Option<Node>> {
        let workspaces = self.workspaces.read().unwrap_or_else(PoisonError::into_inner);
        let content = workspaces
            .get(workspace)
            .ok_or_else(|| self.invalid_workspace(workspace))?;
        Ok(content
            .nodes
            .get(path)
            .map(|record| content.to_node(path, record)))
    }

    pub fn node_count(&self, workspace: &str) -> Result<usize> {
        let workspaces = self.workspaces.read().unwrap_or_else(PoisonError::into_inner);
        workspaces
            .get(workspace)
            .map(|content| content.nodes.len())
            .ok_or_else(|| self.invalid_workspace(workspace))
    }
}

impl RepositoryConnection for InMemoryRepository {
    fn workspace_names(&self) -> Result<Vec<String>> {
        let workspaces = self.workspaces.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = workspaces.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn read_subgraph(&self, workspace: &str, path: &Path, depth: usize) -> Result<Vec<Node>> {
        let workspaces = self.workspaces.read().unwrap_or_else(PoisonError::into_inner);
        let content = workspaces
            .get(workspace)
            .ok_or_else(|| self.invalid_workspace(workspace))?;
        if !content.nodes.contains_key(path) {
            return Err(RepographError::NodeNotFound(path.to_string()));
        }

        let mut nodes = Vec::new();
        // Depth-first, children pushed in reverse so they pop in document order.
        let mut stack = vec![(path.clone(), 0usize)];
        while let Some((current, level)) = stack.pop() {
            if level >= depth {
                continue;
            }
            let Some(record) = content.nodes.get(&current) else {
                continue;
            };
            nodes.push(content.to_node(&current, record));
            for child in record.children.iter().rev() {
                stack.push((child.clone(), level + 1));
            }
        }
        Ok(nodes)
    }
}

impl RepositoryConnectionFactory for InMemoryRepository {
    fn create_connection(&self, source_name: &str) -> Result<Box<dyn RepositoryConnection>> {
        if source_name != self.name {
            return Err(RepographError::InvalidArgument(format!(
                "unknown source '{}' (this repository is '{}')",
                source_name, self.name
            )));
        }
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Name, Value};

    fn path(segments: &[&str]) -> Path {
        segments
            .iter()
            .fold(Path::root(), |p, s| p.child(Name::unqualified(*s), 1))
    }

    fn repository() -> InMemoryRepository {
        let repo = InMemoryRepository::new("source");
        repo.create_workspace("default").unwrap();
        repo.create_node("default", &path(&["a"]), vec![]).unwrap();
        repo.create_node("default", &path(&["a", "b"]), vec![]).unwrap();
        repo.create_node("default", &path(&["a", "b", "c"]), vec![]).unwrap();
        repo.create_node("default", &path(&["a", "d"]), vec![]).unwrap();
        repo
    }

    #[test]
    fn test_create_requires_parent() {
        let repo = repository();
        let err = repo
            .create_node("default", &path(&["x", "y"]), vec![])
            .unwrap_err();
        assert!(matches!(err, RepographError::NodeNotFound(_)));
        let err = repo.create_node("nope", &path(&["x"]), vec![]).unwrap_err();
        assert!(err.is_invalid_workspace());
    }

    #[test]
    fn test_create_existing_merges_properties() {
        let repo = repository();
        let a = path(&["a"]);
        let first = repo
            .create_node("default", &a, vec![Property::single(Name::unqualified("p"), "1")])
            .unwrap();
        let second = repo
            .create_node("default", &a, vec![Property::single(Name::unqualified("q"), "2")])
            .unwrap();
        assert_eq!(first, second);
        let node = repo.node("default", &a).unwrap().unwrap();
        assert_eq!(node.properties.len(), 2);
        repo.set_properties("default", &a, vec![Property::single(Name::unqualified("p"), "3")])
            .unwrap();
        let node = repo.node("default", &a).unwrap().unwrap();
        assert_eq!(
            node.property(&Name::unqualified("p")).unwrap().first_value(),
            Some(&Value::from("3"))
        );
    }

    #[test]
    fn test_read_subgraph_respects_depth() {
        let repo = repository();
        let all = repo.read_subgraph("default", &Path::root(), 10).unwrap();
        let paths: Vec<String> = all.iter().map(|n| n.path().to_string()).collect();
        assert_eq!(paths, vec!["/", "/a", "/a/b", "/a/b/c", "/a/d"]);

        let shallow = repo.read_subgraph("default", &path(&["a"]), 2).unwrap();
        let paths: Vec<String> = shallow.iter().map(|n| n.path().to_string()).collect();
        assert_eq!(paths, vec!["/a", "/a/b", "/a/d"]);
        // Children of the frontier are still listed.
        assert_eq!(shallow[1].children.len(), 1);
    }

    #[test]
    fn test_delete_subtree() {
        let repo = repository();
        assert_eq!(repo.delete_subtree("default", &path(&["a", "b"])).unwrap(), 2);
        assert_eq!(repo.node_count("default").unwrap(), 3);
        let a = repo.node("default", &path(&["a"])).unwrap().unwrap();
        assert_eq!(a.children.len(), 1);
        assert_eq!(repo.delete_subtree("default", &Path::root()).unwrap(), 2);
        assert_eq!(repo.node_count("default").unwrap(), 1);
    }

    #[test]
    fn test_recorded_changes() {
        let repo = repository();
        repo.create_node("default", &path(&["x"]), vec![]).unwrap();
        assert!(repo.take_changes().is_empty());

        repo.record_changes(true);
        let y = path(&["y"]);
        repo.create_node("default", &y, vec![]).unwrap();
        repo.set_properties("default", &y, vec![Property::single(Name::unqualified("p"), "1")])
            .unwrap();
        repo.delete_subtree("default", &path(&["a"])).unwrap();

        let changes = repo.take_changes();
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|change| change.workspace() == "default"));
        assert!(matches!(&changes[0], Change::CreateNode { node, .. } if node.path() == &y));
        match &changes[1] {
            Change::SetProperties { node, .. } => {
                assert_eq!(node.properties.len(), 1);
                assert!(node.location.uuid.is_some());
            }
            other => panic!("unexpected change {:?}", other),
        }
        assert_eq!(
            changes[2],
            Change::DeleteSubtree {
                workspace: "default".to_string(),
                path: path(&["a"]),
            }
        );
        assert!(repo.take_changes().is_empty());

        repo.delete_subtree("default", &Path::root()).unwrap();
        let changes = repo.take_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes[0].path().is_root());
        assert!(matches!(&changes[1], Change::CreateNode { .. }));

        repo.record_changes(false);
        repo.create_node("default", &path(&["z"]), vec![]).unwrap();
        assert!(repo.take_changes().is_empty());
    }

    #[test]
    fn test_connection_factory_checks_source_name() {
        let repo = repository();
        assert!(repo.create_connection("other").is_err());
        let connection = repo.create_connection("source").unwrap();
        assert_eq!(connection.workspace_names().unwrap(), vec!["default".to_string()]);
    }
}
