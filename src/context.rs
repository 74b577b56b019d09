use std::sync::Arc;

use crate::config::NamespacesConfig;
use crate::error::Result;
use crate::graph::{Name, Path};
use crate::namespace::{
    well_known_namespaces, NamespaceRegistry, PrefixGenerator, SimpleNamespaceRegistry,
};

/// Everything an operation needs to interpret names and paths.
#[derive(Clone)]
pub struct ExecutionContext {
    namespaces: Arc<dyn NamespaceRegistry>,
}

impl ExecutionContext {
    /// Context with a fresh registry holding the well-known namespaces.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(SimpleNamespaceRegistry::with_namespaces(
            well_known_namespaces(),
        )))
    }

    /// Like [`ExecutionContext::new`], generating prefixes from the configured template.
    pub fn from_config(config: &NamespacesConfig) -> Self {
        let registry =
            SimpleNamespaceRegistry::with_generator(PrefixGenerator::new(&config.prefix_template));
        for namespace in well_known_namespaces() {
            registry.register(&namespace.prefix, &namespace.uri);
        }
        Self::with_registry(Arc::new(registry))
    }

    pub fn with_registry(namespaces: Arc<dyn NamespaceRegistry>) -> Self {
        Self { namespaces }
    }

    /// Same context, different registry.
    pub fn with_namespace_registry(&self, namespaces: Arc<dyn NamespaceRegistry>) -> Self {
        Self { namespaces }
    }

    pub fn namespace_registry(&self) -> &Arc<dyn NamespaceRegistry> {
        &self.namespaces
    }

    pub fn name(&self, text: &str) -> Result<Name> {
        Name::parse(text, self.namespaces.as_ref())
    }

    pub fn path(&self, text: &str) -> Result<Path> {
        Path::parse(text, self.namespaces.as_ref())
    }

    pub fn render_name(&self, name: &Name) -> String {
        name.render(self.namespaces.as_ref())
    }

    pub fn render_path(&self, path: &Path) -> String {
        path.render(self.namespaces.as_ref())
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("namespaces", &self.namespaces.namespaces())
            .finish()
    }
}
