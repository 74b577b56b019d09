use super::{Node, Path};

/// One mutation of a workspace's content, in the form the indexes consume.
///
/// Node-carrying variants hold the node's state after the mutation, so applying a change
/// never needs to read the source again.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A node was added.
    CreateNode { workspace: String, node: Node },
    /// Properties of an existing node were set or replaced.
    SetProperties { workspace: String, node: Node },
    /// The node at `path` and all of its descendants were removed.
    DeleteSubtree { workspace: String, path: Path },
}

impl Change {
    pub fn workspace(&self) -> &str {
        match self {
            Change::CreateNode { workspace, .. }
            | Change::SetProperties { workspace, .. }
            | Change::DeleteSubtree { workspace, .. } => workspace,
        }
    }

    /// Path of the affected node, or the root of the removed subtree.
    pub fn path(&self) -> &Path {
        match self {
            Change::CreateNode { node, .. } | Change::SetProperties { node, .. } => node.path(),
            Change::DeleteSubtree { path, .. } => path,
        }
    }
}

/// Split `changes` by workspace. Workspaces keep the order of their first change, and each
/// group keeps the original order of its changes.
pub fn group_by_workspace(changes: &[Change]) -> Vec<(String, Vec<Change>)> {
    let mut groups: Vec<(String, Vec<Change>)> = Vec::new();
    for change in changes {
        match groups.iter_mut().find(|(name, _)| name == change.workspace()) {
            Some((_, group)) => group.push(change.clone()),
            None => groups.push((change.workspace().to_string(), vec![change.clone()])),
        }
    }
    groups
}
