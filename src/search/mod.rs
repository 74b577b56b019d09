//! Search engine facade over the per-workspace index sessions of one content source.

mod engine;
mod workspace;

pub use engine::{SearchEngine, SearchEngineConfig};
pub use workspace::{Workspace, WorkspaceRegistry};
