use std::collections::HashMap;

use super::destination::Destination;
use super::handler::PropertyElementPolicy;
use crate::error::{RepographError, Result};
use crate::graph::{Name, Path, PropertyMap, Value};

/// What an open element has turned out to be so far.
#[derive(Debug)]
pub(crate) enum EntryState {
    /// Only attribute-derived properties are known.
    Pending(PropertyMap),
    /// A child element proved this is a node. It has been created; these properties
    /// are added when the element closes.
    Node(PropertyMap),
    /// Trailing text made this element a property of its parent.
    Property,
}

/// One open element on the importer's stack.
#[derive(Debug)]
pub(crate) struct ElementEntry {
    name: Name,
    path: Path,
    state: EntryState,
    child_sns: HashMap<Name, usize>,
}

impl ElementEntry {
    pub(crate) fn new(name: Name, path: Path, properties: PropertyMap) -> Self {
        Self {
            name,
            path,
            state: EntryState::Pending(properties),
            child_sns: HashMap::new(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &EntryState {
        &self.state
    }

    /// 1-based index for the next child element with this name.
    pub(crate) fn next_sns_for(&mut self, child: &Name) -> usize {
        next_sns(&mut self.child_sns, child)
    }

    pub(crate) fn add_property(&mut self, name: Name, value: Value) -> Result<()> {
        match &mut self.state {
            EntryState::Pending(properties) | EntryState::Node(properties) => {
                properties.put(name, value);
                Ok(())
            }
            EntryState::Property => Err(RepographError::StateViolation(format!(
                "element {} already became a property",
                self.path
            ))),
        }
    }

    /// Whether trailing text would make this element a single property value.
    pub(crate) fn is_property_element(
        &self,
        policy: PropertyElementPolicy,
        type_attribute: Option<&Name>,
    ) -> bool {
        match &self.state {
            EntryState::Property => true,
            EntryState::Node(_) => false,
            EntryState::Pending(properties) => {
                if properties.is_empty() {
                    return true;
                }
                policy == PropertyElementPolicy::NoPropertiesOrTypeMarker
                    && properties.len() == 1
                    && type_attribute.is_some_and(|t| properties.contains_key(t))
            }
        }
    }

    /// Create this element as a node, keeping its pending properties for `submit`.
    /// Idempotent once the element is a node.
    pub(crate) fn ensure_node(&mut self, destination: &mut dyn Destination) -> Result<()> {
        match &self.state {
            EntryState::Node(_) => Ok(()),
            EntryState::Property => Err(RepographError::StateViolation(format!(
                "element {} is a property and cannot hold child elements",
                self.path
            ))),
            EntryState::Pending(_) => {
                destination.create(&self.path, Vec::new())?;
                if let EntryState::Pending(properties) =
                    std::mem::replace(&mut self.state, EntryState::Property)
                {
                    self.state = EntryState::Node(properties);
                }
                Ok(())
            }
        }
    }

    /// Turn a still-pending element into a property value for its parent.
    pub(crate) fn into_property(self, value: Value) -> Result<(Name, Value)> {
        match self.state {
            EntryState::Pending(_) => Ok((self.name, value)),
            EntryState::Node(_) => Err(RepographError::StateViolation(format!(
                "element {} is already a node",
                self.path
            ))),
            EntryState::Property => Err(RepographError::StateViolation(format!(
                "element {} already became a property",
                self.path
            ))),
        }
    }

    /// Hand the element's content to the destination.
    ///
    /// A pending element is created with all its properties in one call; a node only
    /// gets an additive property update, and only if it has properties.
    pub(crate) fn submit(self, destination: &mut dyn Destination) -> Result<()> {
        match self.state {
            EntryState::Property => Ok(()),
            EntryState::Node(properties) if properties.is_empty() => Ok(()),
            EntryState::Node(properties) => {
                destination.set_properties(&self.path, properties.into_properties())
            }
            EntryState::Pending(properties) => {
                destination.create(&self.path, properties.into_properties())
            }
        }
    }
}

pub(crate) fn next_sns(counters: &mut HashMap<Name, usize>, name: &Name) -> usize {
    let counter = counters.entry(name.clone()).or_insert(0);
    *counter += 1;
    *counter
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::graph::Property;

    #[derive(Default)]
    struct Calls {
        context: ExecutionContext,
        created: Vec<(String, usize)>,
        updated: Vec<(String, usize)>,
    }

    impl Destination for Calls {
        fn execution_context(&self) -> &ExecutionContext {
            &self.context
        }
        fn create(&mut self, path: &Path, properties: Vec<Property>) -> Result<()> {
            self.created.push((path.to_string(), properties.len()));
            Ok(())
        }
        fn set_properties(&mut self, path: &Path, properties: Vec<Property>) -> Result<()> {
            self.updated.push((path.to_string(), properties.len()));
            Ok(())
        }
        fn submit(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn entry(name: &str, properties: PropertyMap) -> ElementEntry {
        let name = Name::unqualified(name);
        let path = Path::root().child(name.clone(), 1);
        ElementEntry::new(name, path, properties)
    }

    #[test]
    fn test_ensure_node_creates_once() {
        let mut calls = Calls::default();
        let mut properties = PropertyMap::new();
        properties.put(Name::unqualified("a"), Value::from("1"));
        let mut e = entry("car", properties);

        e.ensure_node(&mut calls).unwrap();
        e.ensure_node(&mut calls).unwrap();
        assert!(matches!(e.state(), EntryState::Node(_)));
        assert_eq!(calls.created, vec![("/car".to_string(), 0)]);

        e.submit(&mut calls).unwrap();
        assert_eq!(calls.updated, vec![("/car".to_string(), 1)]);
    }

    #[test]
    fn test_pending_submit_creates_with_properties() {
        let mut calls = Calls::default();
        let mut properties = PropertyMap::new();
        properties.put(Name::unqualified("a"), Value::from("1"));
        properties.put(Name::unqualified("b"), Value::from("2"));
        entry("car", properties).submit(&mut calls).unwrap();
        assert_eq!(calls.created, vec![("/car".to_string(), 2)]);
        assert!(calls.updated.is_empty());
    }

    #[test]
    fn test_node_cannot_become_property() {
        let mut calls = Calls::default();
        let mut e = entry("car", PropertyMap::new());
        e.ensure_node(&mut calls).unwrap();
        assert!(!e.is_property_element(PropertyElementPolicy::NoProperties, None));
        let err = e.into_property(Value::from("x")).unwrap_err();
        assert!(matches!(err, RepographError::StateViolation(_)));
    }

    #[test]
    fn test_property_element_policy() {
        let marker = Name::unqualified("type");
        let mut properties = PropertyMap::new();
        properties.put(marker.clone(), Value::from("t"));
        let e = entry("car", properties);
        assert!(e.is_property_element(PropertyElementPolicy::NoPropertiesOrTypeMarker, Some(&marker)));
        assert!(!e.is_property_element(PropertyElementPolicy::NoProperties, Some(&marker)));
        assert!(!e.is_property_element(PropertyElementPolicy::NoPropertiesOrTypeMarker, None));
    }

    #[test]
    fn test_sibling_counters_are_per_name() {
        let mut counters = HashMap::new();
        let a = Name::unqualified("a");
        let b = Name::unqualified("b");
        assert_eq!(next_sns(&mut counters, &a), 1);
        assert_eq!(next_sns(&mut counters, &b), 1);
        assert_eq!(next_sns(&mut counters, &a), 2);
    }
}
