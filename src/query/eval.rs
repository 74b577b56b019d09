use chrono::DateTime;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::{Column, Columns, Constraint, Operand, Operator, Query, QueryContext, QueryResults, Row, Table};
use crate::error::{RepographError, Result};
use crate::graph::{Location, Name, Value};
use crate::index::fts::{search_terms, terms};
use crate::index::FieldType;
use crate::namespace::JCR_URI;

/// One property value as the index holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedValue {
    pub name: Name,
    pub text: String,
    pub number: Option<f64>,
    pub field_type: FieldType,
    pub stored: bool,
    pub indexed: bool,
    pub analyzed: bool,
}

impl IndexedValue {
    /// The stored value, typed by its field type.
    pub fn to_value(&self) -> Value {
        match (self.field_type, self.number) {
            (FieldType::Long | FieldType::Int, Some(number)) => Value::Long(number as i64),
            (FieldType::Double | FieldType::Float, Some(number)) => Value::Double(number),
            (FieldType::Decimal, _) => Value::Decimal(self.text.clone()),
            (FieldType::Boolean, _) => Value::Boolean(self.text == "true"),
            (FieldType::Date, _) => DateTime::parse_from_rfc3339(&self.text)
                .map(Value::Date)
                .unwrap_or_else(|_| Value::String(self.text.clone())),
            _ => Value::String(self.text.clone()),
        }
    }
}

/// A node as the index holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedNode {
    pub id: i64,
    pub location: Location,
    pub values: Vec<IndexedValue>,
}

impl IndexedNode {
    fn indexed_values<'a>(&'a self, name: &'a Name) -> impl Iterator<Item = &'a IndexedValue> + 'a {
        self.values
            .iter()
            .filter(move |v| v.indexed && v.name == *name)
    }

    fn stored_value(&self, name: &Name) -> Option<&IndexedValue> {
        self.values.iter().find(|v| v.stored && v.name == *name)
    }
}

#[derive(Debug, Clone)]
struct Datum {
    text: String,
    number: Option<f64>,
}

impl Datum {
    fn text(text: String) -> Self {
        Self { text, number: None }
    }

    fn number(number: f64) -> Self {
        Self {
            text: number.to_string(),
            number: Some(number),
        }
    }

    fn compare(&self, other: &Datum) -> Ordering {
        match (self.number, other.number) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => self.text.cmp(&other.text),
        }
    }
}

/// `%` matches any run, `_` any single character; everything else is literal.
fn like_pattern(pattern: &str) -> Result<Regex> {
    let mut expression = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression)
        .map_err(|e| RepographError::Query(format!("invalid LIKE pattern '{}': {}", pattern, e)))
}

/// A constraint outcome: `None` when the node does not match, otherwise the full-text
/// score if one applies.
type Outcome = Option<Option<f32>>;

fn best(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

struct Evaluator<'q> {
    context: &'q QueryContext,
    full_text_hits: HashMap<String, HashMap<i64, f32>>,
    like_patterns: HashMap<String, Regex>,
}

impl<'q> Evaluator<'q> {
    fn operand(&self, node: &IndexedNode, operand: &Operand) -> Vec<Datum> {
        let context = &self.context.context;
        match operand {
            Operand::PropertyValue(name) => node
                .indexed_values(name)
                .map(|v| Datum {
                    text: v.text.clone(),
                    number: v.number,
                })
                .collect(),
            Operand::Lower(inner) => self
                .operand(node, inner)
                .into_iter()
                .map(|d| Datum::text(d.text.to_lowercase()))
                .collect(),
            Operand::Upper(inner) => self
                .operand(node, inner)
                .into_iter()
                .map(|d| Datum::text(d.text.to_uppercase()))
                .collect(),
            Operand::Length(inner) => self
                .operand(node, inner)
                .into_iter()
                .map(|d| Datum::number(d.text.chars().count() as f64))
                .collect(),
            Operand::NodeName => {
                let name = node
                    .location
                    .path
                    .last_segment()
                    .map(|segment| context.render_name(segment.name()))
                    .unwrap_or_default();
                vec![Datum::text(name)]
            }
            Operand::NodeLocalName => {
                let name = node
                    .location
                    .path
                    .last_segment()
                    .map(|segment| segment.name().local_name().to_string())
                    .unwrap_or_default();
                vec![Datum::text(name)]
            }
            Operand::NodeDepth => vec![Datum::number(node.location.path.size() as f64)],
            Operand::NodePath => vec![Datum::text(context.render_path(&node.location.path))],
            Operand::Literal(value) => {
                let text = value.to_text(context.namespace_registry().as_ref());
                let number = match value {
                    Value::Long(_) | Value::Double(_) | Value::Decimal(_) => value.as_f64(),
                    Value::Date(date) => Some(date.timestamp_millis() as f64),
                    _ => None,
                };
                vec![Datum { text, number }]
            }
        }
    }

    fn compare(&self, operator: Operator, left: &Datum, right: &Datum) -> bool {
        match operator {
            Operator::EqualTo => left.compare(right) == Ordering::Equal,
            Operator::NotEqualTo => left.compare(right) != Ordering::Equal,
            Operator::LessThan => left.compare(right) == Ordering::Less,
            Operator::LessThanOrEqualTo => left.compare(right) != Ordering::Greater,
            Operator::GreaterThan => left.compare(right) == Ordering::Greater,
            Operator::GreaterThanOrEqualTo => left.compare(right) != Ordering::Less,
            Operator::Like => self
                .like_patterns
                .get(&right.text)
                .is_some_and(|pattern| pattern.is_match(&left.text)),
        }
    }

    fn matches(&self, node: &IndexedNode, constraint: &Constraint) -> Outcome {
        let path = &node.location.path;
        match constraint {
            Constraint::And(left, right) => {
                let left = self.matches(node, left)?;
                let right = self.matches(node, right)?;
                Some(best(left, right))
            }
            Constraint::Or(left, right) => {
                match (self.matches(node, left), self.matches(node, right)) {
                    (Some(a), Some(b)) => Some(best(a, b)),
                    (Some(a), None) | (None, Some(a)) => Some(a),
                    (None, None) => None,
                }
            }
            Constraint::Not(inner) => match self.matches(node, inner) {
                Some(_) => None,
                None => Some(None),
            },
            Constraint::Comparison {
                left,
                operator,
                right,
            } => {
                let left = self.operand(node, left);
                let right = self.operand(node, right);
                let matched = left
                    .iter()
                    .any(|l| right.iter().any(|r| self.compare(*operator, l, r)));
                matched.then_some(None)
            }
            Constraint::PropertyExistence(name) => node
                .values
                .iter()
                .any(|v| v.name == *name)
                .then_some(None),
            Constraint::FullTextSearch {
                property: None,
                expression,
            } => self
                .full_text_hits
                .get(expression)
                .and_then(|hits| hits.get(&node.id))
                .map(|score| Some(*score)),
            Constraint::FullTextSearch {
                property: Some(name),
                expression,
            } => {
                let wanted = search_terms(expression);
                let matched = node.indexed_values(name).any(|value| {
                    if value.analyzed {
                        let have: HashSet<String> = terms(&value.text).into_iter().collect();
                        !wanted.is_empty() && wanted.iter().all(|t| have.contains(t))
                    } else {
                        value.text == expression.trim()
                    }
                });
                matched.then_some(None)
            }
            Constraint::DescendantNode(ancestor) => path.is_descendant_of(ancestor).then_some(None),
            Constraint::ChildNode(parent) => {
                (path.parent().as_ref() == Some(parent)).then_some(None)
            }
            Constraint::SameNode(other) => (path == other).then_some(None),
        }
    }
}

fn check_constraint(table: &Table, constraint: &Constraint) -> Result<()> {
    match constraint {
        Constraint::And(left, right) | Constraint::Or(left, right) => {
            check_constraint(table, left)?;
            check_constraint(table, right)
        }
        Constraint::Not(inner) => check_constraint(table, inner),
        Constraint::Comparison { left, right, .. } => {
            check_operand(table, left)?;
            check_operand(table, right)
        }
        Constraint::PropertyExistence(name) => table.require_column(name).map(|_| ()),
        Constraint::FullTextSearch {
            property: Some(name),
            ..
        } => {
            let column = table.require_column(name)?;
            if column.searchable {
                Ok(())
            } else {
                Err(RepographError::Query(format!(
                    "column '{}' of table '{}' is not full-text searchable",
                    column.name, table.name
                )))
            }
        }
        Constraint::FullTextSearch { property: None, .. }
        | Constraint::DescendantNode(_)
        | Constraint::ChildNode(_)
        | Constraint::SameNode(_) => Ok(()),
    }
}

fn check_operand(table: &Table, operand: &Operand) -> Result<()> {
    match operand {
        Operand::PropertyValue(name) => table.require_column(name).map(|_| ()),
        Operand::Lower(inner) | Operand::Upper(inner) | Operand::Length(inner) => {
            check_operand(table, inner)
        }
        _ => Ok(()),
    }
}

fn collect_full_text(constraint: &Constraint, expressions: &mut Vec<String>) {
    match constraint {
        Constraint::And(left, right) | Constraint::Or(left, right) => {
            collect_full_text(left, expressions);
            collect_full_text(right, expressions);
        }
        Constraint::Not(inner) => collect_full_text(inner, expressions),
        Constraint::FullTextSearch {
            property: None,
            expression,
        } => expressions.push(expression.clone()),
        _ => {}
    }
}

fn collect_like_patterns(constraint: &Constraint, patterns: &mut Vec<String>) {
    match constraint {
        Constraint::And(left, right) | Constraint::Or(left, right) => {
            collect_like_patterns(left, patterns);
            collect_like_patterns(right, patterns);
        }
        Constraint::Not(inner) => collect_like_patterns(inner, patterns),
        Constraint::Comparison {
            operator: Operator::Like,
            right: Operand::Literal(value),
            ..
        } => {
            if let Value::String(pattern) = value {
                patterns.push(pattern.clone());
            }
        }
        _ => {}
    }
}

/// Evaluate `query` over `nodes`.
///
/// `full_text` answers node-wide `CONTAINS(*, ...)` expressions with scores keyed by node id.
/// Rows come back in path order, or by descending score when full-text scores apply.
pub fn evaluate(
    context: &QueryContext,
    query: &Query,
    nodes: Vec<IndexedNode>,
    full_text: &mut dyn FnMut(&str) -> Result<HashMap<i64, f32>>,
) -> Result<QueryResults> {
    let table = context.schemata.require_table(&query.table)?;
    let columns: Vec<Column> = match &query.columns {
        Columns::All => table.columns.clone(),
        Columns::Named(names) => names
            .iter()
            .map(|name| table.require_column(name).cloned())
            .collect::<Result<_>>()?,
    };

    let mut full_text_hits = HashMap::new();
    let mut like_patterns = HashMap::new();
    if let Some(constraint) = &query.constraint {
        check_constraint(table, constraint)?;
        let mut expressions = Vec::new();
        collect_full_text(constraint, &mut expressions);
        for expression in expressions {
            if !full_text_hits.contains_key(&expression) {
                let hits = full_text(&expression)?;
                full_text_hits.insert(expression, hits);
            }
        }
        let mut patterns = Vec::new();
        collect_like_patterns(constraint, &mut patterns);
        for pattern in patterns {
            let regex = like_pattern(&pattern)?;
            like_patterns.insert(pattern, regex);
        }
    }

    let evaluator = Evaluator {
        context,
        full_text_hits,
        like_patterns,
    };
    let primary_type = Name::new(JCR_URI, "primaryType");
    let required_type = table
        .node_type
        .as_ref()
        .map(|node_type| context.context.render_name(node_type));

    let mut rows = Vec::new();
    for node in &nodes {
        if let Some(required) = &required_type {
            let typed = node
                .values
                .iter()
                .any(|v| v.name == primary_type && v.text == *required);
            if !typed {
                continue;
            }
        }
        let score = match &query.constraint {
            Some(constraint) => match evaluator.matches(node, constraint) {
                Some(score) => score,
                None => continue,
            },
            None => None,
        };
        let values = columns
            .iter()
            .map(|column| node.stored_value(&column.property).map(IndexedValue::to_value))
            .collect();
        rows.push(Row {
            location: node.location.clone(),
            values,
            score,
        });
    }

    if rows.iter().any(|row| row.score.is_some()) {
        rows.sort_by(|a, b| {
            let (sa, sb) = (a.score.unwrap_or(0.0), b.score.unwrap_or(0.0));
            sb.partial_cmp(&sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.location.path.cmp(&b.location.path))
        });
    } else {
        rows.sort_by(|a, b| a.location.path.cmp(&b.location.path));
    }

    let rows = rows
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(QueryResults {
        columns: columns.into_iter().map(|c| c.name).collect(),
        rows,
    })
}
