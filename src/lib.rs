pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod import;
pub mod index;
pub mod namespace;
pub mod query;
pub mod search;

pub use config::Config;
pub use context::ExecutionContext;
pub use error::{RepographError, Result};
pub use graph::{Change, InMemoryRepository, Location, Name, Node, Path, Property, Value};
pub use import::{import_xml, GraphDestination, ImportOptions};
pub use index::{IndexLayout, IndexRules, IndexSession, SqliteIndexLayout};
pub use query::{parse_sql, ImmutableSchemata, Query, QueryResults};
pub use search::{SearchEngine, SearchEngineConfig};
