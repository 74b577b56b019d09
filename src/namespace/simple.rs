use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{Namespace, NamespaceRegistry};

/// Template used when no other is configured: `ns001`, `ns002`, ...
pub const DEFAULT_PREFIX_TEMPLATE: &str = "ns000";

/// Produces prefixes from a template.
///
/// A `#` in the template is replaced by the counter (`ns#` -> `ns1`, `x#y` -> `x1y`).
/// Otherwise the last run of `0`s is replaced by the counter zero-padded to the run's
/// width (`ns000` -> `ns001`); counters wider than the run are written in full.
/// A template with neither gets the counter appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixGenerator {
    head: String,
    tail: String,
    width: usize,
}

impl PrefixGenerator {
    pub fn new(template: &str) -> Self {
        if let Some(pos) = template.find('#') {
            return Self {
                head: template[..pos].to_string(),
                tail: template[pos + 1..].to_string(),
                width: 0,
            };
        }
        if let Some(end) = template.rfind('0') {
            let start = template[..end]
                .rfind(|c: char| c != '0')
                .map(|i| i + 1)
                .unwrap_or(0);
            return Self {
                head: template[..start].to_string(),
                tail: template[end + 1..].to_string(),
                width: end + 1 - start,
            };
        }
        Self {
            head: template.to_string(),
            tail: String::new(),
            width: 0,
        }
    }

    pub fn prefix(&self, counter: u32) -> String {
        format!(
            "{}{:0width$}{}",
            self.head,
            counter,
            self.tail,
            width = self.width
        )
    }
}

impl Default for PrefixGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX_TEMPLATE)
    }
}

#[derive(Debug, Default)]
struct Bindings {
    uri_by_prefix: HashMap<String, String>,
    prefix_by_uri: HashMap<String, String>,
    next_generated: u32,
}

impl Bindings {
    fn bind(&mut self, prefix: &str, uri: &str) -> Option<String> {
        // A uri has at most one prefix, a prefix at most one uri.
        if let Some(old_prefix) = self.prefix_by_uri.remove(uri) {
            self.uri_by_prefix.remove(&old_prefix);
        }
        let previous = self
            .uri_by_prefix
            .insert(prefix.to_string(), uri.to_string());
        if let Some(old_uri) = &previous {
            if old_uri != uri {
                self.prefix_by_uri.remove(old_uri);
            }
        }
        self.prefix_by_uri.insert(uri.to_string(), prefix.to_string());
        previous
    }
}

/// Thread-safe registry backed by two maps.
///
/// The empty prefix is bound to the empty uri on creation and is never left unbound.
#[derive(Debug)]
pub struct SimpleNamespaceRegistry {
    bindings: RwLock<Bindings>,
    generator: PrefixGenerator,
}

impl SimpleNamespaceRegistry {
    pub fn new() -> Self {
        Self::with_generator(PrefixGenerator::default())
    }

    pub fn with_generator(generator: PrefixGenerator) -> Self {
        let mut bindings = Bindings::default();
        bindings.bind("", "");
        Self {
            bindings: RwLock::new(bindings),
            generator,
        }
    }

    /// Registry pre-populated with `namespaces`.
    pub fn with_namespaces(namespaces: impl IntoIterator<Item = Namespace>) -> Self {
        let registry = Self::new();
        for ns in namespaces {
            registry.register(&ns.prefix, &ns.uri);
        }
        registry
    }
}

impl Default for SimpleNamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry for SimpleNamespaceRegistry {
    fn namespace_for_prefix(&self, prefix: &str) -> Option<String> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.uri_by_prefix.get(prefix).cloned()
    }

    fn prefix_for_namespace_uri(&self, uri: &str, generate_if_missing: bool) -> Option<String> {
        {
            let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(prefix) = bindings.prefix_by_uri.get(uri) {
                return Some(prefix.clone());
            }
        }
        if !generate_if_missing {
            return None;
        }

        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have bound it between the two locks.
        if let Some(prefix) = bindings.prefix_by_uri.get(uri) {
            return Some(prefix.clone());
        }
        let prefix = loop {
            bindings.next_generated += 1;
            let candidate = self.generator.prefix(bindings.next_generated);
            if !bindings.uri_by_prefix.contains_key(&candidate) {
                break candidate;
            }
        };
        log::debug!("Generated namespace prefix '{}' for {}", prefix, uri);
        bindings.bind(&prefix, uri);
        Some(prefix)
    }

    fn is_registered_namespace_uri(&self, uri: &str) -> bool {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.prefix_by_uri.contains_key(uri)
    }

    fn default_namespace_uri(&self) -> String {
        self.namespace_for_prefix("").unwrap_or_default()
    }

    fn register(&self, prefix: &str, uri: &str) -> Option<String> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let previous = bindings.bind(prefix, uri);
        if !bindings.uri_by_prefix.contains_key("") {
            // The default namespace lost its binding to another prefix.
            bindings.uri_by_prefix.insert(String::new(), String::new());
            bindings
                .prefix_by_uri
                .entry(String::new())
                .or_insert_with(String::new);
        }
        previous
    }

    fn unregister(&self, uri: &str) -> bool {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let Some(prefix) = bindings.prefix_by_uri.remove(uri) else {
            return false;
        };
        bindings.uri_by_prefix.remove(&prefix);
        if prefix.is_empty() {
            bindings.bind("", "");
        }
        true
    }

    fn namespaces(&self) -> Vec<Namespace> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        let mut namespaces: Vec<Namespace> = bindings
            .uri_by_prefix
            .iter()
            .map(|(prefix, uri)| Namespace::new(prefix.clone(), uri.clone()))
            .collect();
        namespaces.sort();
        namespaces
    }
}
