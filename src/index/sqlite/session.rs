use chrono::DateTime;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::{RepographError, Result};
use crate::graph::{Location, Name, Node, Path, Value};
use crate::index::fts::{all_terms_fts5_query, normalize_bm25_score, sanitize_fts5_query};
use crate::index::layout::IndexSession;
use crate::index::rules::{FieldType, IndexRules, Rule};
use crate::namespace::{EncodingNamespaceRegistry, NamespaceRegistry};
use crate::query::{evaluate, IndexedNode, IndexedValue, Query, QueryContext, QueryResults, Row};

/// A value converted for the content index.
#[derive(Debug, Clone, PartialEq)]
struct Converted {
    text: String,
    number: Option<f64>,
    field_type: FieldType,
}

fn finite(number: f64) -> Option<f64> {
    number.is_finite().then_some(number)
}

/// Convert `value` to the rule's field type. Values that do not convert, or fall outside the
/// rule's bounds, are kept as plain text.
fn convert(value: &Value, rule: &Rule, registry: &dyn NamespaceRegistry) -> Converted {
    let text = value.to_text(registry);
    let as_text = |text: String| Converted {
        text,
        number: None,
        field_type: FieldType::String,
    };

    let number = match rule.field_type {
        FieldType::String => {
            let number = match value {
                Value::String(_) => text.trim().parse().ok().and_then(finite),
                Value::Long(_) | Value::Double(_) => value.as_f64(),
                _ => None,
            };
            return Converted {
                text,
                number,
                field_type: FieldType::String,
            };
        }
        FieldType::Binary | FieldType::Reference | FieldType::WeakReference => {
            return Converted {
                text,
                number: None,
                field_type: rule.field_type,
            };
        }
        FieldType::Long | FieldType::Int => match value {
            Value::Long(long) => Some(*long as f64),
            _ => text.trim().parse::<i64>().ok().map(|long| long as f64),
        },
        FieldType::Double | FieldType::Float | FieldType::Decimal => {
            value.as_f64().or_else(|| text.trim().parse().ok()).and_then(finite)
        }
        FieldType::Boolean => match value {
            Value::Boolean(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => match text.trim().to_lowercase().as_str() {
                "true" => Some(1.0),
                "false" => Some(0.0),
                _ => None,
            },
        },
        FieldType::Date => match value {
            Value::Date(date) => Some(date.timestamp_millis() as f64),
            _ => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|date| date.timestamp_millis() as f64),
        },
    };

    match number {
        Some(number) if rule.accepts(number) => {
            let text = match rule.field_type {
                FieldType::Boolean => (number == 1.0).to_string(),
                FieldType::Date => match value {
                    Value::Date(date) => date.to_rfc3339(),
                    _ => text.trim().to_string(),
                },
                _ => text,
            };
            Converted {
                text,
                number: Some(number),
                field_type: rule.field_type,
            }
        }
        Some(number) => {
            log::warn!(
                "Value {} is outside the {} bounds of its index rule; indexing as text",
                number,
                rule.field_type.as_str()
            );
            as_text(text)
        }
        None => {
            log::warn!(
                "Value '{}' is not a valid {}; indexing as text",
                text,
                rule.field_type.as_str()
            );
            as_text(text)
        }
    }
}

/// `LIKE` pattern text with the escape character `\`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn full_text_scores(conn: &Connection, expression: &str) -> Result<HashMap<i64, f32>> {
    let Some(match_query) = all_terms_fts5_query(expression) else {
        return Ok(HashMap::new());
    };
    let mut stmt = conn.prepare(
        "SELECT node_id, bm25(content_fts) FROM content_fts WHERE content_fts MATCH ?1",
    )?;
    let rows = stmt.query_map(params![match_query], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut scores = HashMap::new();
    for row in rows {
        let (node_id, raw_score) = row?;
        scores.insert(node_id, normalize_bm25_score(raw_score));
    }
    Ok(scores)
}

/// Index session over one workspace database.
///
/// The first write opens a transaction that stays open until `commit()` or `rollback()`.
pub struct SqliteIndexSession {
    conn: Connection,
    workspace_name: String,
    rules: IndexRules,
    encoding: Arc<EncodingNamespaceRegistry>,
    read_only: bool,
}

impl SqliteIndexSession {
    pub fn new(
        conn: Connection,
        workspace_name: &str,
        rules: IndexRules,
        encoding: Arc<EncodingNamespaceRegistry>,
        read_only: bool,
    ) -> Self {
        Self {
            conn,
            workspace_name: workspace_name.to_string(),
            rules,
            encoding,
            read_only,
        }
    }

    /// Path as stored in the index.
    pub fn encoded_path(&self, path: &Path) -> String {
        path.render(self.encoding.as_ref())
    }

    fn decode_path(&self, text: &str) -> Result<Path> {
        Path::parse(text, self.encoding.as_ref())
    }

    /// Number of indexed nodes, committed or not.
    pub fn indexed_node_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn begin_write(&mut self) -> Result<()> {
        if self.read_only {
            return Err(RepographError::StateViolation(format!(
                "index session for workspace '{}' is read-only",
                self.workspace_name
            )));
        }
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn location(&self, path: &str, uuid: Option<String>) -> Result<Location> {
        let path = self.decode_path(path)?;
        let uuid = uuid.and_then(|text| Uuid::parse_str(&text).ok());
        Ok(Location::new(path, uuid))
    }

    fn load_nodes(&self) -> Result<Vec<IndexedNode>> {
        let mut nodes: HashMap<i64, IndexedNode> = HashMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT node_id, path, uuid FROM nodes")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;
            for row in rows {
                let (id, path, uuid) = row?;
                let location = self.location(&path, uuid)?;
                nodes.insert(
                    id,
                    IndexedNode {
                        id,
                        location,
                        values: Vec::new(),
                    },
                );
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT node_id, namespace_uri, local_name, field_type, string_value, numeric_value,
                    stored, indexed, analyzed
             FROM properties ORDER BY node_id, namespace_uri, local_name, position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, bool>(8)?,
            ))
        })?;
        for row in rows {
            let (id, uri, local, field_type, text, number, stored, indexed, analyzed) = row?;
            if let Some(node) = nodes.get_mut(&id) {
                node.values.push(IndexedValue {
                    name: Name::new(uri, local),
                    text,
                    number,
                    field_type: FieldType::from_str_opt(&field_type).unwrap_or(FieldType::String),
                    stored,
                    indexed,
                    analyzed,
                });
            }
        }
        Ok(nodes.into_values().collect())
    }
}

impl IndexSession for SqliteIndexSession {
    fn workspace_name(&self) -> &str {
        &self.workspace_name
    }

    fn index(&mut self, node: &Node) -> Result<()> {
        self.begin_write()?;
        let path = node.path();
        let encoded = self.encoded_path(path);
        self.conn
            .execute("DELETE FROM nodes WHERE path = ?1", params![encoded])?;

        let parent = path.parent().map(|parent| self.encoded_path(&parent));
        let (uri, local, sns) = match path.last_segment() {
            Some(segment) => (
                segment.name().namespace_uri().to_string(),
                segment.name().local_name().to_string(),
                segment.index(),
            ),
            None => (String::new(), String::new(), 1),
        };
        self.conn.execute(
            "INSERT INTO nodes (path, parent_path, uuid, namespace_uri, local_name, sns_index, depth)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                encoded,
                parent,
                node.location.uuid.map(|uuid| uuid.to_string()),
                uri,
                local,
                sns as i64,
                path.size() as i64,
            ],
        )?;
        let node_id = self.conn.last_insert_rowid();

        let registry = self.encoding.delegate().clone();
        let mut full_text = Vec::new();
        for property in &node.properties {
            let rule = self.rules.get_rule(Some(&property.name)).clone();
            if rule.is_dropped() {
                continue;
            }
            for (position, value) in property.values.iter().enumerate() {
                let converted = convert(value, &rule, registry.as_ref());
                self.conn.execute(
                    "INSERT INTO properties (node_id, namespace_uri, local_name, position, field_type,
                                             string_value, numeric_value, stored, indexed, analyzed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        node_id,
                        property.name.namespace_uri(),
                        property.name.local_name(),
                        position as i64,
                        converted.field_type.as_str(),
                        converted.text,
                        converted.number,
                        rule.is_stored(),
                        rule.index.is_indexed(),
                        rule.index.is_analyzed(),
                    ],
                )?;
                if rule.full_text && rule.index.is_indexed() && rule.field_type != FieldType::Binary {
                    full_text.push(converted.text);
                }
            }
        }

        if !full_text.is_empty() {
            self.conn.execute(
                "INSERT INTO content_fts (node_id, full_text) VALUES (?1, ?2)",
                params![node_id, full_text.join(" ")],
            )?;
        }
        Ok(())
    }

    fn delete_below(&mut self, path: &Path) -> Result<usize> {
        self.begin_write()?;
        let removed = if path.is_root() {
            self.conn.execute("DELETE FROM nodes", [])?
        } else {
            let encoded = self.encoded_path(path);
            let descendants = format!("{}/%", escape_like(&encoded));
            self.conn.execute(
                "DELETE FROM nodes WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'",
                params![encoded, descendants],
            )?
        };
        log::debug!(
            "Removed {} index entries at or below {} in workspace '{}'",
            removed,
            path,
            self.workspace_name
        );
        Ok(removed)
    }

    fn optimize(&mut self) -> Result<()> {
        self.begin_write()?;
        self.conn
            .execute("INSERT INTO content_fts(content_fts) VALUES('optimize')", [])?;
        self.conn.execute_batch("PRAGMA optimize;")?;
        log::info!("Optimized indexes for workspace '{}'", self.workspace_name);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
            log::debug!("Committed index changes for workspace '{}'", self.workspace_name);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
            log::warn!("Rolled back index changes for workspace '{}'", self.workspace_name);
        }
        Ok(())
    }

    fn has_changes(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn search(
        &mut self,
        _context: &ExecutionContext,
        full_text: &str,
        max_results: usize,
        offset: usize,
    ) -> Result<QueryResults> {
        let Some(match_query) = sanitize_fts5_query(full_text) else {
            return Ok(QueryResults::default());
        };
        if max_results == 0 {
            return Ok(QueryResults::default());
        }

        let hits = {
            let mut stmt = self.conn.prepare(
                "SELECT n.path, n.uuid, bm25(content_fts) AS raw_score
                 FROM content_fts
                 JOIN nodes n ON n.node_id = content_fts.node_id
                 WHERE content_fts MATCH ?1
                 ORDER BY raw_score, n.path
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(
                params![
                    match_query,
                    i64::try_from(max_results).unwrap_or(i64::MAX),
                    i64::try_from(offset).unwrap_or(i64::MAX),
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                },
            )?;
            rows.collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?
        };

        let mut results = QueryResults::default();
        for (path, uuid, raw_score) in hits {
            results.rows.push(Row {
                location: self.location(&path, uuid)?,
                values: Vec::new(),
                score: Some(normalize_bm25_score(raw_score)),
            });
        }
        log::debug!(
            "Full-text search '{}' in workspace '{}' returned {} rows",
            full_text,
            self.workspace_name,
            results.len()
        );
        Ok(results)
    }

    fn query(&mut self, context: &QueryContext, query: &Query) -> Result<QueryResults> {
        let nodes = self.load_nodes()?;
        let conn = &self.conn;
        let mut full_text = |expression: &str| full_text_scores(conn, expression);
        evaluate(context, query, nodes, &mut full_text)
    }
}
