use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use super::{Namespace, NamespaceRegistry};

/// Number of hex characters kept from each namespace hash.
pub const DEFAULT_HASH_LENGTH: usize = 10;

const CACHE_CAPACITY: usize = 256;

/// Registry that exposes hash tokens instead of human prefixes.
///
/// Paths rendered through this registry serialize every non-fixed namespace as a stable
/// hex token, so index entries never depend on document-chosen prefixes and never carry
/// characters from the raw URI. Fixed namespaces and the default namespace keep their
/// delegate prefix.
pub struct EncodingNamespaceRegistry {
    delegate: Arc<dyn NamespaceRegistry>,
    hash_length: usize,
    fixed: HashSet<String>,
    tokens: Mutex<LruCache<String, String>>,
}

impl EncodingNamespaceRegistry {
    /// # Arguments
    ///
    /// * `delegate` - Registry holding the real bindings
    /// * `hash_length` - Token length in hex characters (clamped to 1..=64)
    /// * `fixed` - URIs that bypass encoding
    pub fn new(
        delegate: Arc<dyn NamespaceRegistry>,
        hash_length: usize,
        fixed: impl IntoIterator<Item = String>,
    ) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            delegate,
            hash_length: hash_length.clamp(1, 64),
            fixed: fixed.into_iter().collect(),
            tokens: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn delegate(&self) -> &Arc<dyn NamespaceRegistry> {
        &self.delegate
    }

    pub fn is_fixed(&self, uri: &str) -> bool {
        uri.is_empty() || self.fixed.contains(uri) || self.delegate.default_namespace_uri() == uri
    }

    /// Hash token for `uri`, independent of any registration.
    pub fn encode(&self, uri: &str) -> String {
        let mut cache = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cache.get(uri) {
            return token.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(uri.as_bytes());
        let mut token = format!("{:x}", hasher.finalize());
        token.truncate(self.hash_length);
        cache.put(uri.to_string(), token.clone());
        token
    }

    fn prefix_for_registered(&self, uri: &str) -> Option<String> {
        if self.is_fixed(uri) {
            self.delegate.prefix_for_namespace_uri(uri, false)
        } else {
            Some(self.encode(uri))
        }
    }
}

impl NamespaceRegistry for EncodingNamespaceRegistry {
    fn namespace_for_prefix(&self, prefix: &str) -> Option<String> {
        if let Some(uri) = self.delegate.namespace_for_prefix(prefix) {
            if self.is_fixed(&uri) {
                return Some(uri);
            }
        }
        self.delegate
            .registered_namespace_uris()
            .into_iter()
            .filter(|uri| !self.is_fixed(uri))
            .find(|uri| self.encode(uri) == prefix)
    }

    fn prefix_for_namespace_uri(&self, uri: &str, generate_if_missing: bool) -> Option<String> {
        if self.is_fixed(uri) {
            return self
                .delegate
                .prefix_for_namespace_uri(uri, generate_if_missing);
        }
        if !self.delegate.is_registered_namespace_uri(uri) {
            self.delegate
                .prefix_for_namespace_uri(uri, generate_if_missing)?;
        }
        Some(self.encode(uri))
    }

    fn is_registered_namespace_uri(&self, uri: &str) -> bool {
        self.delegate.is_registered_namespace_uri(uri)
    }

    fn default_namespace_uri(&self) -> String {
        self.delegate.default_namespace_uri()
    }

    fn register(&self, prefix: &str, uri: &str) -> Option<String> {
        self.delegate.register(prefix, uri)
    }

    fn unregister(&self, uri: &str) -> bool {
        self.delegate.unregister(uri)
    }

    fn namespaces(&self) -> Vec<Namespace> {
        let mut namespaces: Vec<Namespace> = self
            .delegate
            .namespaces()
            .into_iter()
            .filter_map(|ns| {
                self.prefix_for_registered(&ns.uri)
                    .map(|prefix| Namespace::new(prefix, ns.uri))
            })
            .collect();
        namespaces.sort();
        namespaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{SimpleNamespaceRegistry, JCR_URI};

    fn registry() -> EncodingNamespaceRegistry {
        let delegate = SimpleNamespaceRegistry::new();
        delegate.register("jcr", JCR_URI);
        delegate.register("cars", "http://example.com/cars");
        EncodingNamespaceRegistry::new(Arc::new(delegate), 10, [JCR_URI.to_string()])
    }

    #[test]
    fn test_fixed_namespace_keeps_prefix() {
        let registry = registry();
        assert_eq!(registry.prefix_for_namespace_uri(JCR_URI, false).as_deref(), Some("jcr"));
        assert_eq!(registry.namespace_for_prefix("jcr").as_deref(), Some(JCR_URI));
    }

    #[test]
    fn test_other_namespaces_become_hash_tokens() {
        let registry = registry();
        let token = registry
            .prefix_for_namespace_uri("http://example.com/cars", false)
            .unwrap();
        assert_eq!(token.len(), 10);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, "cars");
        assert_eq!(
            registry.namespace_for_prefix(&token).as_deref(),
            Some("http://example.com/cars")
        );
        // The human prefix is not an encoded token.
        assert_eq!(registry.namespace_for_prefix("cars"), None);
    }

    #[test]
    fn test_tokens_are_stable_across_instances() {
        let a = registry().encode("http://example.com/cars");
        let b = registry().encode("http://example.com/cars");
        assert_eq!(a, b);
        assert_ne!(a, registry().encode("http://example.com/boats"));
    }

    #[test]
    fn test_unregistered_uri_without_generation() {
        let registry = registry();
        assert_eq!(registry.prefix_for_namespace_uri("http://unknown", false), None);
        assert!(registry.prefix_for_namespace_uri("http://unknown", true).is_some());
        assert!(registry.is_registered_namespace_uri("http://unknown"));
    }

    #[test]
    fn test_namespaces_lists_tokens() {
        let registry = registry();
        let token = registry.encode("http://example.com/cars");
        let all = registry.namespaces();
        assert!(all.contains(&Namespace::new(token, "http://example.com/cars")));
        assert!(all.contains(&Namespace::new("jcr", JCR_URI)));
    }
}
