//! Index storage: per-property indexing rules, the layout that owns one index per
//! workspace, and the sessions that write and search those indexes.

mod layout;
mod rules;

pub(crate) mod fts;
pub mod sqlite;

pub use layout::{IndexLayout, IndexSession};
pub use rules::{FieldType, IndexOption, IndexRules, IndexRulesBuilder, Rule, Store};
pub use sqlite::{SqliteIndexLayout, SqliteIndexSession};
