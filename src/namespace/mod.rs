//! Namespace registries: prefix <-> URI bindings.
//!
//! Three implementations share the [`NamespaceRegistry`] contract:
//! - [`SimpleNamespaceRegistry`]: the shared, process-wide registry with prefix generation
//! - [`LocalNamespaceRegistry`]: a document-scoped overlay used while importing
//! - [`EncodingNamespaceRegistry`]: replaces prefixes with hash tokens for index storage

mod encoding;
mod local;
mod simple;

pub use encoding::{EncodingNamespaceRegistry, DEFAULT_HASH_LENGTH};
pub use local::LocalNamespaceRegistry;
pub use simple::{PrefixGenerator, SimpleNamespaceRegistry, DEFAULT_PREFIX_TEMPLATE};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Content-model namespace (`jcr`).
pub const JCR_URI: &str = "http://www.jcp.org/jcr/1.0";
/// Node-type namespace (`nt`).
pub const NT_URI: &str = "http://www.jcp.org/jcr/nt/1.0";
/// Mixin namespace (`mix`).
pub const MIX_URI: &str = "http://www.jcp.org/jcr/mix/1.0";
/// The repository's own system namespace (`rg`).
pub const RG_URI: &str = "http://www.repograph.org/1.0";
/// Reserved `xml` namespace.
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespaces every execution context starts with.
pub fn well_known_namespaces() -> Vec<Namespace> {
    vec![
        Namespace::new("jcr", JCR_URI),
        Namespace::new("nt", NT_URI),
        Namespace::new("mix", MIX_URI),
        Namespace::new("rg", RG_URI),
        Namespace::new("xml", XML_URI),
    ]
}

/// A (prefix, uri) binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }
}

/// Prefix <-> URI mapping shared between execution contexts.
///
/// Implementations use interior mutability so a registry can be shared behind an `Arc`
/// and written from the importer while other contexts read it.
pub trait NamespaceRegistry: Send + Sync {
    /// URI bound to `prefix`, if any. The empty prefix names the default namespace.
    fn namespace_for_prefix(&self, prefix: &str) -> Option<String>;

    /// Prefix bound to `uri`.
    ///
    /// When no prefix is bound and `generate_if_missing` is true, a fresh prefix is
    /// generated, registered, and returned; otherwise `None`.
    fn prefix_for_namespace_uri(&self, uri: &str, generate_if_missing: bool) -> Option<String>;

    /// Pure membership test.
    fn is_registered_namespace_uri(&self, uri: &str) -> bool;

    /// URI currently bound to the empty prefix.
    fn default_namespace_uri(&self) -> String;

    /// Bind `prefix` to `uri`, unbinding any other prefix for `uri`.
    /// Returns the URI previously bound to `prefix`.
    fn register(&self, prefix: &str, uri: &str) -> Option<String>;

    /// Remove the binding for `uri`. Returns whether a binding existed.
    fn unregister(&self, uri: &str) -> bool;

    /// Snapshot of all bindings.
    fn namespaces(&self) -> Vec<Namespace>;

    fn registered_namespace_uris(&self) -> HashSet<String> {
        self.namespaces().into_iter().map(|ns| ns.uri).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registries() -> Vec<Arc<dyn NamespaceRegistry>> {
        let shared: Arc<dyn NamespaceRegistry> = Arc::new(SimpleNamespaceRegistry::new());
        vec![
            Arc::new(SimpleNamespaceRegistry::new()),
            Arc::new(LocalNamespaceRegistry::new(shared.clone())),
            Arc::new(EncodingNamespaceRegistry::new(
                Arc::new(SimpleNamespaceRegistry::new()),
                DEFAULT_HASH_LENGTH,
                [JCR_URI.to_string()],
            )),
        ]
    }

    #[test]
    fn test_round_trip_for_every_registry() {
        for registry in registries() {
            registry.register("ex", "http://example.com/ns");
            let prefix = registry
                .prefix_for_namespace_uri("http://example.com/ns", false)
                .unwrap();
            assert_eq!(
                registry.namespace_for_prefix(&prefix).as_deref(),
                Some("http://example.com/ns")
            );
            let uri = registry.namespace_for_prefix(&prefix).unwrap();
            assert_eq!(registry.prefix_for_namespace_uri(&uri, false), Some(prefix));
        }
    }

    #[test]
    fn test_default_namespace_always_present() {
        for registry in registries() {
            assert_eq!(registry.namespace_for_prefix("").as_deref(), Some(""));
            registry.register("", "http://example.com/default");
            assert_eq!(registry.default_namespace_uri(), "http://example.com/default");
        }
    }

    #[test]
    fn test_generated_prefix_is_stable() {
        for registry in registries() {
            let first = registry
                .prefix_for_namespace_uri("http://example.com/fresh", true)
                .unwrap();
            let second = registry
                .prefix_for_namespace_uri("http://example.com/fresh", true)
                .unwrap();
            assert_eq!(first, second);
            assert!(registry.is_registered_namespace_uri("http://example.com/fresh"));
        }
    }
}
