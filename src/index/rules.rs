use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::Name;
use crate::namespace::{JCR_URI, RG_URI};

/// How a property value is typed inside the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Double,
    Float,
    Int,
    Boolean,
    Long,
    Date,
    Binary,
    Reference,
    WeakReference,
    Decimal,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Int => "int",
            FieldType::Boolean => "boolean",
            FieldType::Long => "long",
            FieldType::Date => "date",
            FieldType::Binary => "binary",
            FieldType::Reference => "reference",
            FieldType::WeakReference => "weak-reference",
            FieldType::Decimal => "decimal",
        }
    }

    pub fn from_str_opt(text: &str) -> Option<FieldType> {
        let field_type = match text {
            "string" => FieldType::String,
            "double" => FieldType::Double,
            "float" => FieldType::Float,
            "int" => FieldType::Int,
            "boolean" => FieldType::Boolean,
            "long" => FieldType::Long,
            "date" => FieldType::Date,
            "binary" => FieldType::Binary,
            "reference" => FieldType::Reference,
            "weak-reference" => FieldType::WeakReference,
            "decimal" => FieldType::Decimal,
            _ => return None,
        };
        Some(field_type)
    }

    /// Whether values of this type carry a numeric form in the index.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Double
                | FieldType::Float
                | FieldType::Int
                | FieldType::Long
                | FieldType::Date
                | FieldType::Decimal
        )
    }
}

/// Whether the original value is kept and returned in query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Yes,
    No,
}

/// How a value is made searchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOption {
    No,
    Analyzed,
    AnalyzedNoNorms,
    NotAnalyzed,
    NotAnalyzedNoNorms,
}

impl IndexOption {
    pub fn is_indexed(&self) -> bool {
        !matches!(self, IndexOption::No)
    }

    /// Analyzed values are split into terms; others match only as a whole.
    pub fn is_analyzed(&self) -> bool {
        matches!(self, IndexOption::Analyzed | IndexOption::AnalyzedNoNorms)
    }
}

/// Indexing behavior for one property.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub skipped: bool,
    pub can_be_reference: bool,
    pub full_text: bool,
    pub field_type: FieldType,
    pub store: Store,
    pub index: IndexOption,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl Rule {
    /// Rule for properties that never reach the index.
    pub fn skip() -> Self {
        Self {
            skipped: true,
            can_be_reference: false,
            full_text: false,
            field_type: FieldType::String,
            store: Store::No,
            index: IndexOption::No,
            minimum: None,
            maximum: None,
        }
    }

    fn typed(field_type: FieldType, store: Store, index: IndexOption) -> Self {
        Self {
            skipped: false,
            can_be_reference: false,
            full_text: false,
            field_type,
            store,
            index,
            minimum: None,
            maximum: None,
        }
    }

    pub fn is_stored(&self) -> bool {
        self.store == Store::Yes
    }

    /// A property is dropped entirely when skipped, or when it is neither indexed nor stored.
    pub fn is_dropped(&self) -> bool {
        self.skipped || (!self.index.is_indexed() && !self.is_stored())
    }

    /// Whether `value` lies within this rule's bounds.
    pub fn accepts(&self, value: f64) -> bool {
        self.minimum.map_or(true, |min| value >= min) && self.maximum.map_or(true, |max| value <= max)
    }
}

/// Frozen table of per-property rules with a default.
///
/// Cloning is cheap; the table is shared.
#[derive(Debug, Clone)]
pub struct IndexRules {
    rules_by_name: Arc<HashMap<Name, Rule>>,
    default_rule: Arc<Rule>,
}

impl IndexRules {
    pub fn create_builder() -> IndexRulesBuilder {
        IndexRulesBuilder {
            rules_by_name: HashMap::new(),
            default_rule: None,
        }
    }

    /// Builder starting from the rules of `initial`.
    pub fn builder_from(initial: &IndexRules) -> IndexRulesBuilder {
        IndexRulesBuilder {
            rules_by_name: initial.rules_by_name.as_ref().clone(),
            default_rule: Some(initial.default_rule.as_ref().clone()),
        }
    }

    /// The rule for `name`, or the default rule when `name` is `None` or has no rule of its own.
    pub fn get_rule(&self, name: Option<&Name>) -> &Rule {
        name.and_then(|name| self.rules_by_name.get(name))
            .unwrap_or(&self.default_rule)
    }

    pub fn default_rule(&self) -> &Rule {
        &self.default_rule
    }

    /// Everything stored, analyzed and full-text searchable, except identifiers (indexed whole)
    /// and the standard timestamps (dates).
    pub fn default_rules() -> IndexRules {
        Self::create_builder()
            .default_to(Store::Yes, IndexOption::Analyzed, true, true)
            .string_field(
                Name::new(JCR_URI, "uuid"),
                Store::Yes,
                IndexOption::NotAnalyzed,
                true,
                false,
            )
            .string_field(
                Name::new(RG_URI, "uuid"),
                Store::Yes,
                IndexOption::NotAnalyzed,
                true,
                false,
            )
            .date_field(Name::new(JCR_URI, "created"), Store::Yes, IndexOption::NotAnalyzed, None)
            .date_field(
                Name::new(JCR_URI, "lastModified"),
                Store::Yes,
                IndexOption::NotAnalyzed,
                None,
            )
            .build()
    }
}

impl Default for IndexRules {
    fn default() -> Self {
        Self::default_rules()
    }
}

/// Builds an [`IndexRules`]. Later definitions for a name replace earlier ones.
#[derive(Debug)]
pub struct IndexRulesBuilder {
    rules_by_name: HashMap<Name, Rule>,
    default_rule: Option<Rule>,
}

impl IndexRulesBuilder {
    /// String rule used for properties without a rule of their own.
    pub fn default_to(
        mut self,
        store: Store,
        index: IndexOption,
        can_be_reference: bool,
        full_text: bool,
    ) -> Self {
        let mut rule = Rule::typed(FieldType::String, store, index);
        rule.can_be_reference = can_be_reference;
        rule.full_text = full_text;
        self.default_rule = Some(rule);
        self
    }

    pub fn skip(mut self, names: impl IntoIterator<Item = Name>) -> Self {
        for name in names {
            self.rules_by_name.insert(name, Rule::skip());
        }
        self
    }

    pub fn string_field(
        mut self,
        name: Name,
        store: Store,
        index: IndexOption,
        can_be_reference: bool,
        full_text: bool,
    ) -> Self {
        let mut rule = Rule::typed(FieldType::String, store, index);
        rule.can_be_reference = can_be_reference;
        rule.full_text = full_text;
        self.rules_by_name.insert(name, rule);
        self
    }

    pub fn binary_field(mut self, name: Name, store: Store, index: IndexOption, full_text: bool) -> Self {
        let mut rule = Rule::typed(FieldType::Binary, store, index);
        rule.full_text = full_text;
        self.rules_by_name.insert(name, rule);
        self
    }

    pub fn reference(mut self, name: Name, store: Store, index: IndexOption) -> Self {
        let mut rule = Rule::typed(FieldType::Reference, store, index);
        rule.can_be_reference = true;
        self.rules_by_name.insert(name, rule);
        self
    }

    /// Weak references are not followed by referential integrity checks, so the rule
    /// does not mark them as references.
    pub fn weak_reference(mut self, name: Name, store: Store, index: IndexOption, full_text: bool) -> Self {
        let mut rule = Rule::typed(FieldType::WeakReference, store, index);
        rule.full_text = full_text;
        self.rules_by_name.insert(name, rule);
        self
    }

    pub fn boolean_field(self, name: Name, store: Store, index: IndexOption) -> Self {
        self.numeric_field(name, FieldType::Boolean, store, index, Some(0.0), Some(1.0))
    }

    pub fn integer_field(
        self,
        name: Name,
        store: Store,
        index: IndexOption,
        min: Option<i32>,
        max: Option<i32>,
    ) -> Self {
        let min = min.unwrap_or(i32::MIN);
        let max = max.unwrap_or(i32::MAX);
        self.numeric_field(
            name,
            FieldType::Int,
            store,
            index,
            Some(f64::from(min)),
            Some(f64::from(max)),
        )
    }

    pub fn long_field(
        self,
        name: Name,
        store: Store,
        index: IndexOption,
        min: Option<i64>,
        max: Option<i64>,
    ) -> Self {
        self.numeric_field(
            name,
            FieldType::Long,
            store,
            index,
            min.map(|v| v as f64),
            max.map(|v| v as f64),
        )
    }

    pub fn float_field(
        self,
        name: Name,
        store: Store,
        index: IndexOption,
        min: Option<f32>,
        max: Option<f32>,
    ) -> Self {
        self.numeric_field(
            name,
            FieldType::Float,
            store,
            index,
            min.map(f64::from),
            max.map(f64::from),
        )
    }

    pub fn double_field(
        self,
        name: Name,
        store: Store,
        index: IndexOption,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Self {
        self.numeric_field(name, FieldType::Double, store, index, min, max)
    }

    pub fn decimal_field(self, name: Name, store: Store, index: IndexOption) -> Self {
        self.numeric_field(name, FieldType::Decimal, store, index, None, None)
    }

    /// Dates are indexed as milliseconds since the epoch; `earliest` becomes the lower bound.
    pub fn date_field(
        self,
        name: Name,
        store: Store,
        index: IndexOption,
        earliest: Option<DateTime<FixedOffset>>,
    ) -> Self {
        let min = earliest.map(|date| date.timestamp_millis() as f64);
        self.numeric_field(name, FieldType::Date, store, index, min, None)
    }

    fn numeric_field(
        mut self,
        name: Name,
        field_type: FieldType,
        store: Store,
        index: IndexOption,
        minimum: Option<f64>,
        maximum: Option<f64>,
    ) -> Self {
        let mut rule = Rule::typed(field_type, store, index);
        rule.minimum = minimum;
        rule.maximum = maximum;
        self.rules_by_name.insert(name, rule);
        self
    }

    /// Freeze the rules. Without a `default_to` call, unknown properties are skipped.
    pub fn build(self) -> IndexRules {
        IndexRules {
            rules_by_name: Arc::new(self.rules_by_name),
            default_rule: Arc::new(self.default_rule.unwrap_or_else(Rule::skip)),
        }
    }
}
