//! Structured queries over indexed content.
//!
//! A [`Query`] selects columns of one table (see [`Schemata`]) for the nodes matching an
//! optional [`Constraint`] tree. Queries are built directly or parsed from a small SQL
//! dialect with [`parse_sql`], then evaluated by an index session.

mod eval;
mod parse;
mod schemata;

pub use eval::{evaluate, IndexedNode, IndexedValue};
pub use parse::parse_sql;
pub use schemata::{Column, ImmutableSchemata, Schemata, SchemataBuilder, Table};

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::graph::{Location, Name, Path, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: Columns,
    pub constraint: Option<Constraint>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    /// All columns of `table`, every node.
    pub fn select_all(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Columns::All,
            constraint: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn filter(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn limit(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Columns {
    All,
    Named(Vec<Name>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    And(Box<Constraint>, Box<Constraint>),
    Or(Box<Constraint>, Box<Constraint>),
    Not(Box<Constraint>),
    Comparison {
        left: Operand,
        operator: Operator,
        right: Operand,
    },
    PropertyExistence(Name),
    /// `property` of `None` searches the whole node.
    FullTextSearch {
        property: Option<Name>,
        expression: String,
    },
    DescendantNode(Path),
    ChildNode(Path),
    SameNode(Path),
}

impl Constraint {
    pub fn and(self, other: Constraint) -> Constraint {
        Constraint::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Constraint) -> Constraint {
        Constraint::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Constraint {
        Constraint::Not(Box::new(self))
    }

    pub fn compare(left: Operand, operator: Operator, right: Operand) -> Constraint {
        Constraint::Comparison {
            left,
            operator,
            right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    PropertyValue(Name),
    Lower(Box<Operand>),
    Upper(Box<Operand>),
    Length(Box<Operand>),
    NodeName,
    NodeLocalName,
    NodeDepth,
    NodePath,
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    EqualTo,
    NotEqualTo,
    LessThan,
    LessThanOrEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    Like,
}

/// What a session needs to evaluate a query.
#[derive(Clone)]
pub struct QueryContext {
    pub context: ExecutionContext,
    pub schemata: Arc<dyn Schemata>,
}

impl QueryContext {
    pub fn new(context: ExecutionContext, schemata: Arc<dyn Schemata>) -> Self {
        Self { context, schemata }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub location: Location,
    /// One entry per result column; `None` when the node has no stored value for it.
    pub values: Vec<Option<Value>>,
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.rows.iter().map(|row| &row.location.path).collect()
    }

    /// Position of `column` among the result columns.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// JSON rendering with prefixed paths and textual values.
    pub fn to_json(&self, context: &ExecutionContext) -> Result<String> {
        let registry = context.namespace_registry();
        let rows: Vec<JsonRow> = self
            .rows
            .iter()
            .map(|row| JsonRow {
                path: context.render_path(&row.location.path),
                uuid: row.location.uuid,
                score: row.score,
                values: self
                    .columns
                    .iter()
                    .zip(&row.values)
                    .map(|(column, value)| {
                        let value = value
                            .as_ref()
                            .map(|v| serde_json::Value::String(v.to_text(registry.as_ref())))
                            .unwrap_or(serde_json::Value::Null);
                        (column.clone(), value)
                    })
                    .collect(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&rows)?)
    }
}

#[derive(Serialize)]
struct JsonRow {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f32>,
    values: serde_json::Map<String, serde_json::Value>,
}
