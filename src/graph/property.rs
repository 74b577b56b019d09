use base64::Engine as _;
use chrono::{DateTime, FixedOffset};
use uuid::Uuid;

use super::name::Name;
use super::path::Path;
use crate::namespace::NamespaceRegistry;

/// A single typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Name(Name),
    Path(Path),
    Long(i64),
    Double(f64),
    /// Arbitrary-precision decimal kept in its textual form.
    Decimal(String),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    Binary(Vec<u8>),
    Reference(Uuid),
    WeakReference(Uuid),
}

impl Value {
    /// Textual form used for indexing and display.
    pub fn to_text(&self, registry: &dyn NamespaceRegistry) -> String {
        match self {
            Value::String(s) | Value::Decimal(s) => s.clone(),
            Value::Name(name) => name.render(registry),
            Value::Path(path) => path.render(registry),
            Value::Long(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Boolean(v) => v.to_string(),
            Value::Date(v) => v.to_rfc3339(),
            Value::Binary(bytes) => base64::engine::general_purpose::STANDARD.encode(bytes),
            Value::Reference(id) | Value::WeakReference(id) => id.to_string(),
        }
    }

    /// Numeric view, parsing textual values when they look numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::String(s) | Value::Decimal(s) => s.trim().parse().ok(),
            Value::Date(v) => Some(v.timestamp_millis() as f64),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Name(_) => "name",
            Value::Path(_) => "path",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::Binary(_) => "binary",
            Value::Reference(_) => "reference",
            Value::WeakReference(_) => "weakreference",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Name> for Value {
    fn from(value: Name) -> Self {
        Value::Name(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

/// A named property with one or more values.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: Name,
    pub values: Vec<Value>,
}

impl Property {
    pub fn new(name: Name, values: Vec<Value>) -> Self {
        Self { name, values }
    }

    pub fn single(name: Name, value: impl Into<Value>) -> Self {
        Self::new(name, vec![value.into()])
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn is_multiple(&self) -> bool {
        self.values.len() > 1
    }
}

/// Multimap from property name to values, keeping names in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    entries: Vec<(Name, Vec<Value>)>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, name: Name, value: Value) {
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    pub fn contains_key(&self, name: &Name) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn get(&self, name: &Name) -> Option<&[Value]> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Number of values across all names.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, values)| values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_properties(self) -> Vec<Property> {
        self.entries
            .into_iter()
            .map(|(name, values)| Property::new(name, values))
            .collect()
    }
}
