//! Streaming markup events with resolved namespaces.
//!
//! [`parse_xml`] drives a [`ContentHandler`] from `quick-xml` events. Namespace
//! declarations are tracked with an explicit scope stack, so every element and
//! attribute name reaches the handler already resolved to its URI.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::BufRead;

use crate::error::{RepographError, Result};
use crate::namespace::XML_URI;

/// A resolved markup name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub uri: String,
    pub local_name: String,
    /// Name as written, including any prefix.
    pub qname: String,
}

impl QualifiedName {
    pub fn has_prefix(&self) -> bool {
        self.qname.contains(':')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QualifiedName,
    pub value: String,
}

/// Receives markup events in document order.
pub trait ContentHandler {
    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()>;
    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()>;
    fn start_element(&mut self, name: &QualifiedName, attributes: &[Attribute]) -> Result<()>;
    fn end_element(&mut self, name: &QualifiedName) -> Result<()>;
    /// May be called several times for one logical run of text.
    fn characters(&mut self, text: &str) -> Result<()>;
    fn end_document(&mut self) -> Result<()>;
}

/// Prefix bindings in effect, with one frame per open element.
#[derive(Default)]
struct NamespaceScopes {
    bindings: HashMap<String, String>,
    frames: Vec<Vec<(String, Option<String>)>>,
}

impl NamespaceScopes {
    fn push_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    fn declare(&mut self, prefix: &str, uri: &str) {
        let previous = self.bindings.insert(prefix.to_string(), uri.to_string());
        if let Some(frame) = self.frames.last_mut() {
            frame.push((prefix.to_string(), previous));
        }
    }

    /// Restore the bindings shadowed by the innermost frame and return its prefixes
    /// in reverse declaration order.
    fn pop_frame(&mut self) -> Vec<String> {
        let frame = self.frames.pop().unwrap_or_default();
        let mut prefixes = Vec::with_capacity(frame.len());
        for (prefix, previous) in frame.into_iter().rev() {
            match previous {
                Some(uri) => {
                    self.bindings.insert(prefix.clone(), uri);
                }
                None => {
                    self.bindings.remove(&prefix);
                }
            }
            prefixes.push(prefix);
        }
        prefixes
    }

    fn resolve(&self, qname: &str, is_attribute: bool) -> Result<QualifiedName> {
        let (prefix, local) = match qname.split_once(':') {
            Some((prefix, local)) => (prefix, local),
            None => ("", qname),
        };
        let uri = if prefix == "xml" {
            XML_URI.to_string()
        } else if prefix.is_empty() && is_attribute {
            // Unprefixed attributes are in no namespace.
            String::new()
        } else {
            match self.bindings.get(prefix) {
                Some(uri) => uri.clone(),
                None if prefix.is_empty() => String::new(),
                None => {
                    return Err(RepographError::Parse(format!(
                        "undeclared namespace prefix '{}' in '{}'",
                        prefix, qname
                    )))
                }
            }
        };
        Ok(QualifiedName {
            uri,
            local_name: local.to_string(),
            qname: qname.to_string(),
        })
    }
}

fn unescape(raw: &str) -> Result<String> {
    quick_xml::escape::unescape(raw)
        .map(|text| text.into_owned())
        .map_err(|e| RepographError::Parse(format!("invalid escape in '{}': {}", raw, e)))
}

struct Driver<'h, H: ContentHandler> {
    handler: &'h mut H,
    scopes: NamespaceScopes,
    open: Vec<QualifiedName>,
}

impl<'h, H: ContentHandler> Driver<'h, H> {
    fn start(&mut self, element: &BytesStart<'_>) -> Result<()> {
        self.scopes.push_frame();

        let mut raw_attributes = Vec::new();
        for attr in element.attributes() {
            let attr = attr.map_err(|e| RepographError::Parse(format!("malformed attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = unescape(&String::from_utf8_lossy(&attr.value))?;
            if key == "xmlns" {
                self.scopes.declare("", &value);
                self.handler.start_prefix_mapping("", &value)?;
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                self.scopes.declare(prefix, &value);
                self.handler.start_prefix_mapping(prefix, &value)?;
            } else {
                raw_attributes.push((key, value));
            }
        }

        let qname = String::from_utf8_lossy(element.name().as_ref()).to_string();
        let name = self.scopes.resolve(&qname, false)?;
        let mut attributes = Vec::with_capacity(raw_attributes.len());
        for (key, value) in raw_attributes {
            attributes.push(Attribute {
                name: self.scopes.resolve(&key, true)?,
                value,
            });
        }

        self.handler.start_element(&name, &attributes)?;
        self.open.push(name);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| RepographError::Parse("unbalanced end tag".to_string()))?;
        self.handler.end_element(&name)?;
        for prefix in self.scopes.pop_frame() {
            self.handler.end_prefix_mapping(&prefix)?;
        }
        Ok(())
    }
}

/// Parse a complete document held in memory.
pub fn parse_xml<H: ContentHandler>(xml: &str, handler: &mut H) -> Result<()> {
    parse_xml_reader(xml.as_bytes(), handler)
}

/// Parse a document from any buffered reader.
pub fn parse_xml_reader<R: BufRead, H: ContentHandler>(source: R, handler: &mut H) -> Result<()> {
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::new();
    let mut driver = Driver {
        handler,
        scopes: NamespaceScopes::default(),
        open: Vec::new(),
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => driver.start(&e)?,
            Ok(Event::Empty(e)) => {
                driver.start(&e)?;
                driver.end()?;
            }
            Ok(Event::End(_)) => driver.end()?,
            Ok(Event::Text(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).to_string();
                driver.handler.characters(&unescape(&text)?)?;
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).to_string();
                driver.handler.characters(&text)?;
            }
            Ok(Event::GeneralRef(e)) => {
                let entity = String::from_utf8_lossy(e.as_ref()).to_string();
                driver.handler.characters(&unescape(&format!("&{};", entity))?)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RepographError::Parse(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            Ok(_) => {}
        }
        buf.clear();
    }

    if !driver.open.is_empty() {
        return Err(RepographError::Parse(
            "document ended with unclosed elements".to_string(),
        ));
    }
    driver.handler.end_document()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ContentHandler for Recorder {
        fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
            self.events.push(format!("ns+ {}={}", prefix, uri));
            Ok(())
        }
        fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
            self.events.push(format!("ns- {}", prefix));
            Ok(())
        }
        fn start_element(&mut self, name: &QualifiedName, attributes: &[Attribute]) -> Result<()> {
            let attrs: Vec<String> = attributes
                .iter()
                .map(|a| format!("{{{}}}{}={}", a.name.uri, a.name.local_name, a.value))
                .collect();
            self.events.push(format!(
                "start {{{}}}{} [{}]",
                name.uri,
                name.local_name,
                attrs.join(",")
            ));
            Ok(())
        }
        fn end_element(&mut self, name: &QualifiedName) -> Result<()> {
            self.events.push(format!("end {}", name.local_name));
            Ok(())
        }
        fn characters(&mut self, text: &str) -> Result<()> {
            if !text.trim().is_empty() {
                self.events.push(format!("text {}", text));
            }
            Ok(())
        }
        fn end_document(&mut self) -> Result<()> {
            self.events.push("done".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_namespace_scopes_resolve_and_unwind() {
        let xml = r#"<a:root xmlns:a="http://a" xmlns="http://d"><child a:x="1" y="2"/></a:root>"#;
        let mut recorder = Recorder::default();
        parse_xml(xml, &mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![
                "ns+ a=http://a",
                "ns+ =http://d",
                "start {http://a}root []",
                "start {http://d}child [{http://a}x=1,{}y=2]",
                "end child",
                "end root",
                "ns- ",
                "ns- a",
                "done",
            ]
        );
    }

    #[test]
    fn test_nested_redeclaration_restores_outer_binding() {
        let xml = r#"<p:a xmlns:p="http://one"><p:b xmlns:p="http://two"/><p:c/></p:a>"#;
        let mut recorder = Recorder::default();
        parse_xml(xml, &mut recorder).unwrap();
        assert!(recorder.events.contains(&"start {http://two}b []".to_string()));
        assert!(recorder.events.contains(&"start {http://one}c []".to_string()));
    }

    #[test]
    fn test_entities_and_cdata_become_text() {
        let xml = "<a>x &amp; y &#65;<![CDATA[<raw>]]></a>";
        let mut recorder = Recorder::default();
        parse_xml(xml, &mut recorder).unwrap();
        let text: String = recorder
            .events
            .iter()
            .filter_map(|e| e.strip_prefix("text "))
            .collect();
        assert_eq!(text, "x & y A<raw>");
    }

    #[test]
    fn test_undeclared_prefix_is_parse_error() {
        let mut recorder = Recorder::default();
        let err = parse_xml("<q:a/>", &mut recorder).unwrap_err();
        assert!(matches!(err, RepographError::Parse(_)));
    }

    #[test]
    fn test_mismatched_tags_fail() {
        let mut recorder = Recorder::default();
        assert!(parse_xml("<a><b></a>", &mut recorder).is_err());
    }
}
