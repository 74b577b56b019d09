//! Breadth-first walk over a content source in depth-bounded reads.

use std::collections::{HashSet, VecDeque};

use super::{Node, Path, RepositoryConnection};
use crate::Result;

/// Visit every node at or below `start`.
///
/// Each read fetches `depth_per_read` levels; children that fall outside a read are
/// queued and read later, so the whole subtree is covered regardless of depth. Within
/// one read nodes arrive depth-first. Returns the number of visited nodes.
pub fn walk_content(
    connection: &dyn RepositoryConnection,
    workspace: &str,
    start: &Path,
    depth_per_read: usize,
    mut visit: impl FnMut(&Node) -> Result<()>,
) -> Result<usize> {
    let depth = depth_per_read.max(1);
    let mut queue = VecDeque::new();
    let mut visited = 0usize;

    queue.push_back(start.clone());

    while let Some(location) = queue.pop_front() {
        let nodes = connection.read_subgraph(workspace, &location, depth)?;
        let read: HashSet<&Path> = nodes.iter().map(|n| n.path()).collect();

        for node in &nodes {
            visit(node)?;
            visited += 1;
            for child in &node.children {
                if !read.contains(&child.path) {
                    queue.push_back(child.path.clone());
                }
            }
        }
    }

    Ok(visited)
}
