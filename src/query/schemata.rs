use std::collections::BTreeMap;

use crate::context::ExecutionContext;
use crate::error::{RepographError, Result};
use crate::graph::Name;

/// A queryable column backed by one property.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Name as written in queries and result headers.
    pub name: String,
    pub property: Name,
    /// Whether `CONTAINS` may target this column.
    pub searchable: bool,
}

/// A logical table: a column list, optionally limited to nodes of one primary type.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub node_type: Option<Name>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn column_for(&self, property: &Name) -> Option<&Column> {
        self.columns.iter().find(|c| c.property == *property)
    }

    /// The column for `property`, or a query error naming the table.
    pub fn require_column(&self, property: &Name) -> Result<&Column> {
        self.column_for(property).ok_or_else(|| {
            RepographError::Query(format!(
                "table '{}' has no column for property {}",
                self.name, property
            ))
        })
    }
}

/// Resolves the tables a query refers to.
pub trait Schemata: Send + Sync {
    fn table(&self, name: &str) -> Option<&Table>;

    fn require_table(&self, name: &str) -> Result<&Table> {
        self.table(name)
            .ok_or_else(|| RepographError::Query(format!("unknown table '{}'", name)))
    }
}

/// Schemata fixed at build time.
#[derive(Debug, Clone, Default)]
pub struct ImmutableSchemata {
    tables: BTreeMap<String, Table>,
}

impl ImmutableSchemata {
    pub fn builder(context: &ExecutionContext) -> SchemataBuilder {
        SchemataBuilder {
            context: context.clone(),
            tables: BTreeMap::new(),
        }
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }
}

impl Schemata for ImmutableSchemata {
    fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }
}

pub struct SchemataBuilder {
    context: ExecutionContext,
    tables: BTreeMap<String, Table>,
}

impl SchemataBuilder {
    /// Add (or replace) a table whose columns are the named properties.
    pub fn add_table(mut self, name: &str, columns: &[&str]) -> Result<Self> {
        let mut parsed = Vec::with_capacity(columns.len());
        for column in columns {
            parsed.push(Column {
                name: column.to_string(),
                property: self.context.name(column)?,
                searchable: false,
            });
        }
        self.tables.insert(
            name.to_string(),
            Table {
                name: name.to_string(),
                node_type: None,
                columns: parsed,
            },
        );
        Ok(self)
    }

    /// Limit `table` to nodes whose primary type is `node_type`.
    pub fn of_type(mut self, table: &str, node_type: &str) -> Result<Self> {
        let node_type = self.context.name(node_type)?;
        self.table_mut(table)?.node_type = Some(node_type);
        Ok(self)
    }

    /// Allow full-text search on one column.
    pub fn make_searchable(mut self, table: &str, column: &str) -> Result<Self> {
        let property = self.context.name(column)?;
        let table = self.table_mut(table)?;
        let table_name = table.name.clone();
        let column = table
            .columns
            .iter_mut()
            .find(|c| c.property == property)
            .ok_or_else(|| {
                RepographError::Query(format!("table '{}' has no column '{}'", table_name, column))
            })?;
        column.searchable = true;
        Ok(self)
    }

    pub fn build(self) -> ImmutableSchemata {
        ImmutableSchemata {
            tables: self.tables,
        }
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| RepographError::Query(format!("unknown table '{}'", name)))
    }
}
