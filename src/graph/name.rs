use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{RepographError, Result};
use crate::namespace::NamespaceRegistry;

/// Namespace-qualified name. Equality ignores whatever prefix was used to write it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    namespace_uri: String,
    local_name: String,
}

impl Name {
    pub fn new(namespace_uri: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace_uri: namespace_uri.into(),
            local_name: local_name.into(),
        }
    }

    /// Name in the empty namespace.
    pub fn unqualified(local_name: impl Into<String>) -> Self {
        Self::new("", local_name)
    }

    /// Build a name from raw markup, decoding the local part.
    pub fn decoded(namespace_uri: &str, local_name: &str, decoder: &dyn TextDecoder) -> Self {
        Self::new(namespace_uri, decoder.decode(local_name))
    }

    pub fn namespace_uri(&self) -> &str {
        &self.namespace_uri
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Parse `prefix:local`, `{uri}local` or `local`.
    ///
    /// Unprefixed names take the registry's default namespace. An unknown prefix is an error.
    pub fn parse(text: &str, registry: &dyn NamespaceRegistry) -> Result<Self> {
        if text.is_empty() {
            return Err(RepographError::InvalidArgument(
                "name must not be empty".to_string(),
            ));
        }
        if let Some(rest) = text.strip_prefix('{') {
            let end = rest.find('}').ok_or_else(|| {
                RepographError::Namespace(format!("unterminated namespace in name '{}'", text))
            })?;
            return Ok(Self::new(&rest[..end], &rest[end + 1..]));
        }
        match text.split_once(':') {
            Some((prefix, local)) => {
                let uri = registry.namespace_for_prefix(prefix).ok_or_else(|| {
                    RepographError::Namespace(format!(
                        "no namespace registered for prefix '{}' in '{}'",
                        prefix, text
                    ))
                })?;
                Ok(Self::new(uri, local))
            }
            None => Ok(Self::new(registry.default_namespace_uri(), text)),
        }
    }

    /// Prefixed form, generating a prefix for unregistered namespaces.
    pub fn render(&self, registry: &dyn NamespaceRegistry) -> String {
        self.render_with_local(registry, &self.local_name)
    }

    /// Prefixed form with path metacharacters in the local name escaped by `\`.
    pub(crate) fn render_escaped(&self, registry: &dyn NamespaceRegistry) -> String {
        self.render_with_local(registry, &escape_local_name(&self.local_name))
    }

    fn render_with_local(&self, registry: &dyn NamespaceRegistry, local: &str) -> String {
        if self.namespace_uri == registry.default_namespace_uri() {
            return local.to_string();
        }
        match registry.prefix_for_namespace_uri(&self.namespace_uri, true) {
            Some(prefix) if prefix.is_empty() => local.to_string(),
            Some(prefix) => format!("{}:{}", prefix, local),
            None if self.namespace_uri.is_empty() => local.to_string(),
            None => format!("{{{}}}{}", self.namespace_uri, local),
        }
    }

    /// Inverse of [`Name::render_escaped`]. Only an unescaped `:` separates the prefix.
    pub(crate) fn parse_escaped(text: &str, registry: &dyn NamespaceRegistry) -> Result<Self> {
        if text.is_empty() {
            return Err(RepographError::InvalidArgument(
                "name must not be empty".to_string(),
            ));
        }
        if let Some(rest) = text.strip_prefix('{') {
            let end = rest.find('}').ok_or_else(|| {
                RepographError::Namespace(format!("unterminated namespace in name '{}'", text))
            })?;
            return Ok(Self::new(&rest[..end], unescape_local_name(&rest[end + 1..])));
        }
        match find_unescaped(text, ':') {
            Some(colon) => {
                let prefix = &text[..colon];
                let uri = registry.namespace_for_prefix(prefix).ok_or_else(|| {
                    RepographError::Namespace(format!(
                        "no namespace registered for prefix '{}' in '{}'",
                        prefix, text
                    ))
                })?;
                Ok(Self::new(uri, unescape_local_name(&text[colon + 1..])))
            }
            None => Ok(Self::new(
                registry.default_namespace_uri(),
                unescape_local_name(text),
            )),
        }
    }
}

/// Characters that delimit paths, names and sibling indexes.
const PATH_METACHARACTERS: &[char] = &['/', ':', '[', ']', '{', '}', '\\'];

pub(crate) fn escape_local_name(local: &str) -> String {
    let mut escaped = String::with_capacity(local.len());
    for c in local.chars() {
        if PATH_METACHARACTERS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) fn unescape_local_name(text: &str) -> String {
    let mut local = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => local.push(chars.next().unwrap_or('\\')),
            _ => local.push(c),
        }
    }
    local
}

/// Byte offset of the first `target` not preceded by the escape character.
pub(crate) fn find_unescaped(text: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == target {
            return Some(i);
        }
    }
    None
}

impl fmt::Display for Name {
    /// Expanded form: `{uri}local`, or just `local` in the empty namespace.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_uri.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.namespace_uri, self.local_name)
        }
    }
}

/// Turns encoded markup names back into their original text.
pub trait TextDecoder: Send + Sync {
    fn decode(&self, text: &str) -> String;
}

/// Leaves text untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDecoder;

impl TextDecoder for NoOpDecoder {
    fn decode(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Decodes `_xHHHH_` escapes used to carry characters that are illegal in XML names.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlNameDecoder;

fn escape_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_x([0-9A-Fa-f]{4})_").expect("Invalid regex pattern"))
}

impl TextDecoder for XmlNameDecoder {
    fn decode(&self, text: &str) -> String {
        if !text.contains("_x") {
            return text.to_string();
        }
        escape_pattern()
            .replace_all(text, |caps: &regex::Captures| {
                u32::from_str_radix(&caps[1], 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{SimpleNamespaceRegistry, JCR_URI};

    fn registry() -> SimpleNamespaceRegistry {
        let registry = SimpleNamespaceRegistry::new();
        registry.register("jcr", JCR_URI);
        registry
    }

    #[test]
    fn test_equality_ignores_prefix() {
        let registry = registry();
        let a = Name::parse("jcr:name", &registry).unwrap();
        let b = Name::parse(&format!("{{{}}}name", JCR_URI), &registry).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.namespace_uri(), JCR_URI);
        assert_eq!(a.local_name(), "name");
    }

    #[test]
    fn test_unprefixed_uses_default_namespace() {
        let registry = registry();
        assert_eq!(Name::parse("car", &registry).unwrap(), Name::unqualified("car"));
        registry.register("", "http://example.com/default");
        let name = Name::parse("car", &registry).unwrap();
        assert_eq!(name.namespace_uri(), "http://example.com/default");
        assert_eq!(name.render(&registry), "car");
    }

    #[test]
    fn test_unknown_prefix_is_error() {
        let err = Name::parse("nope:thing", &registry()).unwrap_err();
        assert!(matches!(err, RepographError::Namespace(_)));
        assert!(matches!(
            Name::parse("", &registry()).unwrap_err(),
            RepographError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_render_generates_prefix() {
        let registry = registry();
        let name = Name::new("http://example.com/new", "thing");
        assert_eq!(name.render(&registry), "ns001:thing");
        assert_eq!(Name::new(JCR_URI, "uuid").render(&registry), "jcr:uuid");
    }

    #[test]
    fn test_display_expanded_form() {
        assert_eq!(Name::unqualified("car").to_string(), "car");
        assert_eq!(Name::new("http://a", "b").to_string(), "{http://a}b");
    }

    #[test]
    fn test_escaped_render_round_trips_metacharacters() {
        let registry = registry();
        for local in ["a/b", "Model:X", "x[2]", "{odd}", "back\\slash", "plain"] {
            let name = Name::unqualified(local);
            let rendered = name.render_escaped(&registry);
            assert_eq!(Name::parse_escaped(&rendered, &registry).unwrap(), name);
        }
        let name = Name::new(JCR_URI, "a:b");
        assert_eq!(name.render_escaped(&registry), "jcr:a\\:b");
        assert_eq!(Name::parse_escaped("jcr:a\\:b", &registry).unwrap(), name);
        assert_eq!(escape_local_name("Model:X"), "Model\\:X");
        assert_eq!(find_unescaped("a\\:b:c", ':'), Some(4));
    }

    #[test]
    fn test_xml_name_decoder() {
        let decoder = XmlNameDecoder;
        assert_eq!(decoder.decode("Toyota_x0020_Prius"), "Toyota Prius");
        assert_eq!(decoder.decode("a_x002F_b_x003A_c"), "a/b:c");
        assert_eq!(decoder.decode("plain_name"), "plain_name");
        assert_eq!(decoder.decode("bad_xZZZZ_"), "bad_xZZZZ_");
        assert_eq!(
            Name::decoded("", "My_x0020_Car", &decoder),
            Name::unqualified("My Car")
        );
        assert_eq!(NoOpDecoder.decode("My_x0020_Car"), "My_x0020_Car");
    }
}
