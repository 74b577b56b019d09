use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Namespace, NamespaceRegistry};

/// Document-scoped overlay over a shared registry.
///
/// Lookups consult the local bindings first and then the delegate. `register` and
/// `unregister` only touch the local layer, so scoped re-declarations never leak into
/// the shared registry.
pub struct LocalNamespaceRegistry {
    delegate: Arc<dyn NamespaceRegistry>,
    local: RwLock<HashMap<String, String>>,
}

impl LocalNamespaceRegistry {
    pub fn new(delegate: Arc<dyn NamespaceRegistry>) -> Self {
        Self {
            delegate,
            local: RwLock::new(HashMap::new()),
        }
    }

    /// The shared registry underneath this overlay.
    pub fn delegate(&self) -> &Arc<dyn NamespaceRegistry> {
        &self.delegate
    }

    /// Bindings held only by this overlay.
    pub fn local_namespaces(&self) -> Vec<Namespace> {
        let local = self.local.read().unwrap_or_else(PoisonError::into_inner);
        let mut namespaces: Vec<Namespace> = local
            .iter()
            .map(|(prefix, uri)| Namespace::new(prefix.clone(), uri.clone()))
            .collect();
        namespaces.sort();
        namespaces
    }

    fn local_prefix_for(&self, uri: &str) -> Option<String> {
        let local = self.local.read().unwrap_or_else(PoisonError::into_inner);
        local
            .iter()
            .find(|(_, bound)| bound.as_str() == uri)
            .map(|(prefix, _)| prefix.clone())
    }
}

impl NamespaceRegistry for LocalNamespaceRegistry {
    fn namespace_for_prefix(&self, prefix: &str) -> Option<String> {
        {
            let local = self.local.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(uri) = local.get(prefix) {
                return Some(uri.clone());
            }
        }
        self.delegate.namespace_for_prefix(prefix)
    }

    fn prefix_for_namespace_uri(&self, uri: &str, generate_if_missing: bool) -> Option<String> {
        self.local_prefix_for(uri)
            .or_else(|| self.delegate.prefix_for_namespace_uri(uri, generate_if_missing))
    }

    fn is_registered_namespace_uri(&self, uri: &str) -> bool {
        self.local_prefix_for(uri).is_some() || self.delegate.is_registered_namespace_uri(uri)
    }

    fn default_namespace_uri(&self) -> String {
        self.namespace_for_prefix("").unwrap_or_default()
    }

    fn register(&self, prefix: &str, uri: &str) -> Option<String> {
        let mut local = self.local.write().unwrap_or_else(PoisonError::into_inner);
        local.retain(|p, bound| bound.as_str() != uri || p.as_str() == prefix);
        local
            .insert(prefix.to_string(), uri.to_string())
            .or_else(|| self.delegate.namespace_for_prefix(prefix))
    }

    fn unregister(&self, uri: &str) -> bool {
        let mut local = self.local.write().unwrap_or_else(PoisonError::into_inner);
        let before = local.len();
        local.retain(|_, bound| bound.as_str() != uri);
        local.len() != before
    }

    fn namespaces(&self) -> Vec<Namespace> {
        let local = self.local.read().unwrap_or_else(PoisonError::into_inner);
        let mut namespaces: Vec<Namespace> = self
            .delegate
            .namespaces()
            .into_iter()
            .filter(|ns| {
                !local.contains_key(&ns.prefix) && !local.values().any(|uri| *uri == ns.uri)
            })
            .collect();
        namespaces.extend(
            local
                .iter()
                .map(|(prefix, uri)| Namespace::new(prefix.clone(), uri.clone())),
        );
        namespaces.sort();
        namespaces
    }
}
