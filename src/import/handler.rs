use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::destination::Destination;
use super::entry::{next_sns, ElementEntry};
use super::sax::{Attribute, ContentHandler, QualifiedName};
use crate::config::ImportConfig;
use crate::context::ExecutionContext;
use crate::error::{RepographError, Result};
use crate::graph::{Name, Path, Property, PropertyMap, TextDecoder, Value, XmlNameDecoder};
use crate::namespace::{LocalNamespaceRegistry, NamespaceRegistry, JCR_URI, NT_URI};

/// Namespace given to attributes written without a prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeScoping {
    /// The document's default namespace.
    #[default]
    UseDefaultNamespace,
    /// The namespace of the element carrying the attribute.
    InheritElementNamespace,
}

/// Which elements may turn into a property when they close with text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyElementPolicy {
    /// Only elements without any properties.
    NoProperties,
    /// Elements without properties, or whose only property is the type marker.
    #[default]
    NoPropertiesOrTypeMarker,
}

/// How markup maps onto nodes and properties.
#[derive(Clone)]
pub struct ImportOptions {
    /// Ignore the document element and import its children directly under `parent`.
    pub skip_root_element: bool,
    /// Path under which imported nodes are created.
    pub parent: Path,
    /// Attribute whose value names the node instead of the element name.
    pub name_attribute: Option<Name>,
    /// Attribute (and property) holding the node's type marker.
    pub type_attribute: Option<Name>,
    /// Type marker for elements that do not carry one.
    pub type_attribute_value: Option<Name>,
    pub attribute_scoping: AttributeScoping,
    pub property_element_policy: PropertyElementPolicy,
    /// Applied to element and attribute names, never to attribute values.
    pub decoder: Arc<dyn TextDecoder>,
}

impl ImportOptions {
    /// Options with no name or type attributes.
    pub fn plain() -> Self {
        Self {
            skip_root_element: false,
            parent: Path::root(),
            name_attribute: None,
            type_attribute: None,
            type_attribute_value: None,
            attribute_scoping: AttributeScoping::default(),
            property_element_policy: PropertyElementPolicy::default(),
            decoder: Arc::new(XmlNameDecoder),
        }
    }

    /// Resolve configured attribute names against `context`.
    pub fn from_config(config: &ImportConfig, context: &ExecutionContext) -> Result<Self> {
        let resolve = |text: &str| -> Result<Option<Name>> {
            if text.trim().is_empty() {
                Ok(None)
            } else {
                context.name(text.trim()).map(Some)
            }
        };
        Ok(Self {
            skip_root_element: config.skip_root_element,
            parent: Path::root(),
            name_attribute: resolve(&config.name_attribute)?,
            type_attribute: resolve(&config.type_attribute)?,
            type_attribute_value: resolve(&config.type_attribute_value)?,
            attribute_scoping: config.attribute_scoping,
            property_element_policy: config.property_element_policy,
            decoder: Arc::new(XmlNameDecoder),
        })
    }

    pub fn under(mut self, parent: Path) -> Self {
        self.parent = parent;
        self
    }

    pub fn skipping_root_element(mut self, skip: bool) -> Self {
        self.skip_root_element = skip;
        self
    }
}

impl Default for ImportOptions {
    /// `jcr:name` names nodes, `jcr:primaryType` carries the type, `nt:unstructured`
    /// is the fallback type.
    fn default() -> Self {
        Self {
            name_attribute: Some(Name::new(JCR_URI, "name")),
            type_attribute: Some(Name::new(JCR_URI, "primaryType")),
            type_attribute_value: Some(Name::new(NT_URI, "unstructured")),
            ..Self::plain()
        }
    }
}

/// Builds graph content from markup events.
///
/// Each open element waits on the stack until it is known to be a node or a property:
/// a nested element makes its parent a node, trailing text on a property-like element
/// makes it a property of its parent. Namespaces declared by the document live in a
/// local registry layered over the destination's registry.
pub struct XmlImporter<D: Destination> {
    destination: D,
    options: ImportOptions,
    shared: Arc<dyn NamespaceRegistry>,
    local: Arc<LocalNamespaceRegistry>,
    /// Open `(prefix, uri)` declarations, outermost first.
    scopes: Vec<(String, String)>,
    stack: Vec<ElementEntry>,
    top_level_sns: HashMap<Name, usize>,
    text: String,
    skip_next_element: bool,
    xml_characters: Name,
}

impl<D: Destination> XmlImporter<D> {
    pub fn new(destination: D, options: ImportOptions) -> Self {
        let shared = destination.execution_context().namespace_registry().clone();
        let local = Arc::new(LocalNamespaceRegistry::new(shared.clone()));
        let skip_next_element = options.skip_root_element;
        Self {
            destination,
            options,
            shared,
            local,
            scopes: Vec::new(),
            stack: Vec::new(),
            top_level_sns: HashMap::new(),
            text: String::new(),
            skip_next_element,
            xml_characters: Name::new(JCR_URI, "xmlcharacters"),
        }
    }

    /// Uri the innermost open declaration binds to `prefix`.
    fn innermost_uri(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find(|(open, _)| open == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Context whose registry includes the document's in-scope prefixes.
    pub fn local_context(&self) -> ExecutionContext {
        ExecutionContext::with_registry(self.local.clone())
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn into_destination(self) -> D {
        self.destination
    }

    fn attribute_name(&self, element: &QualifiedName, attribute: &Attribute) -> Name {
        let decoder = self.options.decoder.as_ref();
        if attribute.name.uri.is_empty() && !attribute.name.has_prefix() {
            match self.options.attribute_scoping {
                AttributeScoping::InheritElementNamespace => {
                    Name::decoded(&element.uri, &attribute.name.local_name, decoder)
                }
                AttributeScoping::UseDefaultNamespace => Name::decoded(
                    &self.local.default_namespace_uri(),
                    &attribute.name.local_name,
                    decoder,
                ),
            }
        } else {
            Name::decoded(&attribute.name.uri, &attribute.name.local_name, decoder)
        }
    }
}

impl<D: Destination> ContentHandler for XmlImporter<D> {
    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.scopes.push((prefix.to_string(), uri.to_string()));

        if self.local.is_registered_namespace_uri(uri) {
            self.local.register(prefix, uri);
        } else if self.shared.namespace_for_prefix(prefix).is_some() {
            // The prefix means something else process-wide: give the uri a fresh shared
            // prefix and keep the document's prefix locally.
            let generated = self.shared.prefix_for_namespace_uri(uri, true);
            log::debug!(
                "Prefix '{}' already bound; registered {} as {:?}",
                prefix,
                uri,
                generated
            );
            self.local.register(prefix, uri);
        } else {
            self.shared.register(prefix, uri);
        }
        Ok(())
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        let position = self
            .scopes
            .iter()
            .rposition(|(open, _)| open == prefix)
            .ok_or_else(|| {
                RepographError::Namespace(format!("prefix '{}' is not in scope", prefix))
            })?;
        let (_, uri) = self.scopes.remove(position);
        self.local.unregister(&uri);

        // Restore what the closed declaration shadowed: an enclosing prefix for the uri,
        // and an enclosing uri for the prefix.
        let previous = self
            .scopes
            .iter()
            .rev()
            .find(|(open, bound)| {
                *bound == uri && self.innermost_uri(open) == Some(bound.as_str())
            })
            .map(|(open, _)| open.clone());
        if let Some(previous) = previous {
            self.local.register(&previous, &uri);
        }
        if let Some(outer) = self.innermost_uri(prefix).map(str::to_string) {
            if self.local.namespace_for_prefix(prefix).as_deref() != Some(outer.as_str()) {
                self.local.register(prefix, &outer);
            }
        }
        Ok(())
    }

    fn start_element(&mut self, element: &QualifiedName, attributes: &[Attribute]) -> Result<()> {
        self.text.clear();
        if self.skip_next_element {
            self.skip_next_element = false;
            return Ok(());
        }

        if let Some(parent) = self.stack.last_mut() {
            parent.ensure_node(&mut self.destination)?;
        }

        let mut properties = PropertyMap::new();
        let mut node_name: Option<Name> = None;
        let mut type_value: Option<Name> = None;
        let mut seen_name_attribute = false;
        let mut seen_type_attribute = false;

        for attribute in attributes {
            let name = self.attribute_name(element, attribute);
            if self.options.name_attribute.as_ref() == Some(&name) {
                if !seen_name_attribute {
                    seen_name_attribute = true;
                    // Node names come verbatim from the value, without decoding.
                    node_name = Some(Name::parse(&attribute.value, self.local.as_ref())?);
                }
                continue;
            }
            if self.options.type_attribute.as_ref() == Some(&name) {
                if !seen_type_attribute {
                    seen_type_attribute = true;
                    type_value = Some(Name::parse(&attribute.value, self.local.as_ref())?);
                }
                continue;
            }
            properties.put(name, Value::String(attribute.value.clone()));
        }

        let element_name = Name::decoded(
            &element.uri,
            &element.local_name,
            self.options.decoder.as_ref(),
        );
        let node_name = match node_name {
            Some(name) => {
                if type_value.is_none() {
                    type_value = Some(element_name);
                }
                name
            }
            None => element_name,
        };
        if let Some(type_attribute) = &self.options.type_attribute {
            if let Some(value) = type_value.or_else(|| self.options.type_attribute_value.clone()) {
                properties.put(type_attribute.clone(), Value::Name(value));
            }
        }

        let (parent_path, index) = match self.stack.last_mut() {
            Some(parent) => (parent.path().clone(), parent.next_sns_for(&node_name)),
            None => (
                self.options.parent.clone(),
                next_sns(&mut self.top_level_sns, &node_name),
            ),
        };
        let path = parent_path.child(node_name.clone(), index);
        self.stack.push(ElementEntry::new(node_name, path, properties));
        Ok(())
    }

    fn end_element(&mut self, _element: &QualifiedName) -> Result<()> {
        let text = std::mem::take(&mut self.text);
        let Some(mut entry) = self.stack.pop() else {
            // End of a skipped document element.
            return Ok(());
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return entry.submit(&mut self.destination);
        }

        let value = Value::String(trimmed.to_string());
        if entry.is_property_element(
            self.options.property_element_policy,
            self.options.type_attribute.as_ref(),
        ) {
            let (name, value) = entry.into_property(value)?;
            match self.stack.last_mut() {
                Some(parent) => parent.add_property(name, value),
                None => {
                    let parent = self.options.parent.clone();
                    self.destination
                        .set_properties(&parent, vec![Property::single(name, value)])
                }
            }
        } else {
            entry.add_property(self.xml_characters.clone(), value)?;
            entry.submit(&mut self.destination)
        }
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.text.push_str(text);
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        if !self.stack.is_empty() {
            return Err(RepographError::StateViolation(format!(
                "{} elements still open at end of document",
                self.stack.len()
            )));
        }
        self.destination.submit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryRepository;
    use crate::import::{import_xml, parse_xml, GraphDestination};
    use crate::namespace::NamespaceRegistry;

    /// Records every destination call as text.
    struct Recorder {
        context: ExecutionContext,
        calls: Vec<String>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                context: ExecutionContext::new(),
                calls: Vec::new(),
            }
        }

        fn describe(&self, properties: &[Property]) -> String {
            let registry = self.context.namespace_registry().as_ref();
            let parts: Vec<String> = properties
                .iter()
                .map(|p| {
                    let values: Vec<String> = p.values.iter().map(|v| v.to_text(registry)).collect();
                    format!("{}={}", p.name.render(registry), values.join("|"))
                })
                .collect();
            format!("[{}]", parts.join(", "))
        }
    }

    impl Destination for Recorder {
        fn execution_context(&self) -> &ExecutionContext {
            &self.context
        }

        fn create(&mut self, path: &Path, properties: Vec<Property>) -> Result<()> {
            let call = format!(
                "create {} {}",
                self.context.render_path(path),
                self.describe(&properties)
            );
            self.calls.push(call);
            Ok(())
        }

        fn set_properties(&mut self, path: &Path, properties: Vec<Property>) -> Result<()> {
            let call = format!(
                "set {} {}",
                self.context.render_path(path),
                self.describe(&properties)
            );
            self.calls.push(call);
            Ok(())
        }

        fn submit(&mut self) -> Result<()> {
            self.calls.push("submit".to_string());
            Ok(())
        }
    }

    fn record(xml: &str, options: ImportOptions) -> Vec<String> {
        import_xml(xml, Recorder::new(), options).unwrap().calls
    }

    #[test]
    fn test_text_only_element_becomes_parent_property() {
        let calls = record("<root><child>X</child></root>", ImportOptions::plain());
        assert_eq!(
            calls,
            vec!["create /root []", "set /root [child=X]", "submit"]
        );
    }

    #[test]
    fn test_type_marker_still_counts_as_property_element() {
        let calls = record("<root><child>X</child></root>", ImportOptions::default());
        assert_eq!(
            calls,
            vec![
                "create /root []",
                "set /root [jcr:primaryType=nt:unstructured, child=X]",
                "submit",
            ]
        );
    }

    #[test]
    fn test_type_marker_blocks_property_under_strict_policy() {
        let options = ImportOptions {
            property_element_policy: PropertyElementPolicy::NoProperties,
            ..ImportOptions::default()
        };
        let calls = record("<root><child>X</child></root>", options);
        assert_eq!(
            calls,
            vec![
                "create /root []",
                "create /root/child [jcr:primaryType=nt:unstructured, jcr:xmlcharacters=X]",
                "set /root [jcr:primaryType=nt:unstructured]",
                "submit",
            ]
        );
    }

    #[test]
    fn test_nested_element_makes_a_node_despite_whitespace() {
        let calls = record(
            "<root><child>  <grand/>  </child></root>",
            ImportOptions::plain(),
        );
        assert_eq!(
            calls,
            vec![
                "create /root []",
                "create /root/child []",
                "create /root/child/grand []",
                "submit",
            ]
        );
    }

    #[test]
    fn test_same_name_siblings_are_numbered_in_order() {
        let calls = record(
            "<root><item/><other/><item/><item/></root>",
            ImportOptions::plain(),
        );
        assert_eq!(
            calls,
            vec![
                "create /root []",
                "create /root/item []",
                "create /root/other []",
                "create /root/item[2] []",
                "create /root/item[3] []",
                "submit",
            ]
        );
    }

    #[test]
    fn test_attributes_become_properties_in_one_create() {
        let calls = record(r#"<root a="1" b="2"/>"#, ImportOptions::plain());
        assert_eq!(calls, vec!["create /root [a=1, b=2]", "submit"]);
    }

    #[test]
    fn test_trailing_text_on_node_is_xml_characters() {
        let calls = record("<root>hello<child/> world </root>", ImportOptions::plain());
        assert_eq!(
            calls,
            vec![
                "create /root []",
                "create /root/child []",
                "set /root [jcr:xmlcharacters=world]",
                "submit",
            ]
        );
    }

    #[test]
    fn test_top_level_text_element_sets_property_on_import_parent() {
        let calls = record("<title>Cars</title>", ImportOptions::plain());
        assert_eq!(calls, vec!["set / [title=Cars]", "submit"]);
    }

    #[test]
    fn test_skip_root_element_numbers_top_level_siblings() {
        let options = ImportOptions::plain().skipping_root_element(true);
        let calls = record("<root><a/><a/><b/></root>", options);
        assert_eq!(
            calls,
            vec!["create /a []", "create /a[2] []", "create /b []", "submit"]
        );
    }

    #[test]
    fn test_import_under_parent_path() {
        let context = ExecutionContext::new();
        let options = ImportOptions::plain().under(context.path("/x/y").unwrap());
        let calls = record("<a><b/></a>", options);
        assert_eq!(calls, vec!["create /x/y/a []", "create /x/y/a/b []", "submit"]);
    }

    #[test]
    fn test_name_attribute_is_not_decoded_but_element_names_are() {
        let calls = record(
            r#"<My_x0020_Cars xmlns:jcr="http://www.jcp.org/jcr/1.0"><car jcr:name="A_x0020_B" maker="X"/></My_x0020_Cars>"#,
            ImportOptions::default(),
        );
        assert_eq!(
            calls,
            vec![
                "create /My Cars []",
                "create /My Cars/A_x0020_B [maker=X, jcr:primaryType=car]",
                "set /My Cars [jcr:primaryType=nt:unstructured]",
                "submit",
            ]
        );
    }

    #[test]
    fn test_explicit_type_attribute_wins() {
        let calls = record(
            r#"<root xmlns:jcr="http://www.jcp.org/jcr/1.0" jcr:primaryType="nt:folder"/>"#,
            ImportOptions::default(),
        );
        assert_eq!(calls, vec!["create /root [jcr:primaryType=nt:folder]", "submit"]);
    }

    #[test]
    fn test_comments_are_ignored() {
        let calls = record(
            "<root><!-- comment --><a/><!-- another --></root>",
            ImportOptions::plain(),
        );
        assert_eq!(calls, vec!["create /root []", "create /root/a []", "submit"]);
    }

    #[test]
    fn test_attribute_scoping() {
        let xml = r#"<c:car xmlns:c="http://example.com/cars" model="Prius"/>"#;
        let inherit = ImportOptions {
            attribute_scoping: AttributeScoping::InheritElementNamespace,
            ..ImportOptions::plain()
        };
        let destination = import_xml(xml, Recorder::new(), inherit).unwrap();
        assert_eq!(destination.calls[0], "create /c:car [c:model=Prius]");

        let destination = import_xml(xml, Recorder::new(), ImportOptions::plain()).unwrap();
        assert_eq!(destination.calls[0], "create /c:car [model=Prius]");
    }

    #[test]
    fn test_new_document_namespace_reaches_shared_registry() {
        let destination = import_xml(
            r#"<c:car xmlns:c="http://example.com/cars"/>"#,
            Recorder::new(),
            ImportOptions::plain(),
        )
        .unwrap();
        let registry = destination.context.namespace_registry();
        assert_eq!(
            registry.namespace_for_prefix("c").as_deref(),
            Some("http://example.com/cars")
        );
    }

    #[test]
    fn test_conflicting_prefix_gets_generated_shared_prefix() {
        let mut importer = XmlImporter::new(Recorder::new(), ImportOptions::plain());
        parse_xml(
            r#"<jcr:thing xmlns:jcr="http://example.com/other"><jcr:inner/></jcr:thing>"#,
            &mut importer,
        )
        .unwrap();
        // The document prefix is gone once its scope closed.
        let local = importer.local_context();
        assert_eq!(
            local.namespace_registry().namespace_for_prefix("jcr").as_deref(),
            Some(JCR_URI)
        );
        let destination = importer.into_destination();
        let shared = destination.context.namespace_registry();
        assert_eq!(shared.namespace_for_prefix("jcr").as_deref(), Some(JCR_URI));
        let generated = shared
            .prefix_for_namespace_uri("http://example.com/other", false)
            .unwrap();
        assert_eq!(generated, "ns001");
        assert_eq!(
            destination.calls,
            vec!["create /ns001:thing []", "create /ns001:thing/ns001:inner []", "submit"]
        );
    }

    #[test]
    fn test_nested_redeclaration_unwinds() {
        let mut importer = XmlImporter::new(Recorder::new(), ImportOptions::plain());
        parse_xml(
            r#"<a:root xmlns:a="http://one"><a:x xmlns:a="http://two"/><a:y/></a:root>"#,
            &mut importer,
        )
        .unwrap();
        let destination = importer.into_destination();
        let shared = destination.context.namespace_registry();
        let two = shared.prefix_for_namespace_uri("http://two", false).unwrap();
        assert_eq!(
            destination.calls,
            vec![
                "create /a:root []".to_string(),
                format!("create /a:root/{}:x []", two),
                "create /a:root/a:y []".to_string(),
                "submit".to_string(),
            ]
        );
    }

    #[test]
    fn test_closing_redeclaration_restores_outer_binding() {
        let xml = format!(
            r#"<j:r xmlns:j="{}"><j:x xmlns:j="http://two"/><j:y j:primaryType="j:kind"><j:z/></j:y></j:r>"#,
            JCR_URI
        );
        let mut importer = XmlImporter::new(Recorder::new(), ImportOptions::default());
        parse_xml(&xml, &mut importer).unwrap();
        assert!(importer.scopes.is_empty());
        let destination = importer.into_destination();
        assert!(destination
            .calls
            .contains(&"create /jcr:r/jcr:y [jcr:primaryType=jcr:kind]".to_string()));
    }

    #[test]
    fn test_cars_import_into_graph() {
        let repo = InMemoryRepository::new("cars");
        repo.create_workspace("default").unwrap();
        let context = ExecutionContext::new();
        let destination = GraphDestination::new(repo.clone(), "default", context.clone());
        let xml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/cars.xml"));
        import_xml(xml, destination, ImportOptions::default()).unwrap();

        assert_eq!(repo.node_count("default").unwrap(), 18);
        let prius = repo
            .node("default", &context.path("/Cars/Hybrid/Toyota Prius").unwrap())
            .unwrap()
            .unwrap();
        let msrp = prius.property(&Name::unqualified("msrp")).unwrap();
        assert_eq!(msrp.first_value(), Some(&Value::from("$21,500")));
        let primary_type = prius.property(&context.name("jcr:primaryType").unwrap()).unwrap();
        assert_eq!(
            primary_type.first_value(),
            Some(&Value::Name(Name::unqualified("car")))
        );

        let hybrid = repo
            .node("default", &context.path("/Cars/Hybrid").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(hybrid.children.len(), 3);
        assert_eq!(
            hybrid.property(&context.name("jcr:primaryType").unwrap()).unwrap().first_value(),
            Some(&Value::Name(context.name("nt:unstructured").unwrap()))
        );
    }

    #[test]
    fn test_options_from_config() {
        let context = ExecutionContext::new();
        let mut config = ImportConfig::default();
        config.type_attribute_value = String::new();
        config.skip_root_element = true;
        let options = ImportOptions::from_config(&config, &context).unwrap();
        assert_eq!(options.name_attribute, Some(Name::new(JCR_URI, "name")));
        assert!(options.type_attribute_value.is_none());
        assert!(options.skip_root_element);

        config.name_attribute = "unknown:name".to_string();
        assert!(ImportOptions::from_config(&config, &context).is_err());
    }

    #[test]
    fn test_malformed_markup_is_an_error() {
        let result = import_xml("<root><a></root>", Recorder::new(), ImportOptions::plain());
        assert!(result.is_err());
    }
}
