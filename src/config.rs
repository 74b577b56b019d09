use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::import::{AttributeScoping, PropertyElementPolicy};
use crate::namespace::{
    DEFAULT_HASH_LENGTH, DEFAULT_PREFIX_TEMPLATE, JCR_URI, MIX_URI, NT_URI, RG_URI,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub namespaces: NamespacesConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

/// Repository-wide settings
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    /// Name of the content source the search engine reads from.
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            source_name: default_source_name(),
            log_level: default_log_level(),
        }
    }
}

/// Index storage and engine behavior
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Directory holding one database per workspace. Absent means in-memory indexes.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Optimize automatically after this many indexed nodes (0 disables).
    #[serde(default)]
    pub max_changes_before_optimize: usize,
    /// Levels fetched per subgraph read while indexing.
    #[serde(default = "default_depth_per_read")]
    pub depth_per_read: usize,
    /// Check workspace names against the content source.
    #[serde(default = "default_verify_workspaces")]
    pub verify_workspaces: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_changes_before_optimize: 0,
            depth_per_read: default_depth_per_read(),
            verify_workspaces: default_verify_workspaces(),
        }
    }
}

/// Namespace prefix generation and index encoding
#[derive(Debug, Clone, Deserialize)]
pub struct NamespacesConfig {
    #[serde(default = "default_prefix_template")]
    pub prefix_template: String,
    /// Hex characters kept from each namespace hash in index paths.
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,
    /// Namespace URIs written with their readable prefix in index paths.
    #[serde(default = "default_fixed_namespaces")]
    pub fixed: Vec<String>,
}

impl Default for NamespacesConfig {
    fn default() -> Self {
        Self {
            prefix_template: default_prefix_template(),
            hash_length: default_hash_length(),
            fixed: default_fixed_namespaces(),
        }
    }
}

/// Defaults for the XML importer. Empty strings disable the optional attributes.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_name_attribute")]
    pub name_attribute: String,
    #[serde(default = "default_type_attribute")]
    pub type_attribute: String,
    #[serde(default = "default_type_attribute_value")]
    pub type_attribute_value: String,
    #[serde(default)]
    pub attribute_scoping: AttributeScoping,
    #[serde(default)]
    pub property_element_policy: PropertyElementPolicy,
    #[serde(default)]
    pub skip_root_element: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            name_attribute: default_name_attribute(),
            type_attribute: default_type_attribute(),
            type_attribute_value: default_type_attribute_value(),
            attribute_scoping: AttributeScoping::default(),
            property_element_policy: PropertyElementPolicy::default(),
            skip_root_element: false,
        }
    }
}

fn default_source_name() -> String {
    "repository".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_depth_per_read() -> usize {
    10
}

fn default_verify_workspaces() -> bool {
    true
}

fn default_prefix_template() -> String {
    DEFAULT_PREFIX_TEMPLATE.to_string()
}

fn default_hash_length() -> usize {
    DEFAULT_HASH_LENGTH
}

fn default_fixed_namespaces() -> Vec<String> {
    [JCR_URI, NT_URI, MIX_URI, RG_URI]
        .iter()
        .map(|uri| uri.to_string())
        .collect()
}

fn default_name_attribute() -> String {
    "jcr:name".to_string()
}

fn default_type_attribute() -> String {
    "jcr:primaryType".to_string()
}

fn default_type_attribute_value() -> String {
    "nt:unstructured".to_string()
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in REPOGRAPH_CONFIG environment variable
    /// 2. ./repograph.toml in current directory
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("REPOGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("repograph.toml"));

        Self::load_from(&config_path)
    }

    /// Load and validate a specific configuration file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.repository.source_name.trim().is_empty() {
            anyhow::bail!("repository.source_name must not be empty");
        }

        if !LOG_LEVELS.contains(&self.repository.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "repository.log_level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.repository.log_level
            );
        }

        if self.index.depth_per_read == 0 {
            anyhow::bail!("index.depth_per_read must be greater than 0");
        }

        if let Some(dir) = &self.index.directory {
            if dir.exists() && !dir.is_dir() {
                anyhow::bail!(
                    "index.directory must be a directory, not a file: {}",
                    dir.display()
                );
            }
        }

        if !(4..=64).contains(&self.namespaces.hash_length) {
            anyhow::bail!("namespaces.hash_length must be between 4 and 64");
        }

        let template = &self.namespaces.prefix_template;
        if template.is_empty() || template.contains(':') || template.contains(char::is_whitespace) {
            anyhow::bail!(
                "namespaces.prefix_template must be a non-empty prefix without ':' or whitespace"
            );
        }

        Ok(())
    }

    /// Install `env_logger` using `log_level` unless RUST_LOG overrides it.
    pub fn init_logging(&self) {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.repository.log_level.as_str()),
        )
        .try_init();
    }

    pub fn index_directory(&self) -> Option<&Path> {
        self.index.directory.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn create_test_config(temp_dir: &TempDir) -> String {
        let index_dir = temp_dir.path().join("indexes");
        let index_dir_str = index_dir.to_str().unwrap().replace('\\', "\\\\");
        format!(
            r#"
[repository]
source_name = "cars"
log_level = "debug"

[index]
directory = "{}"
max_changes_before_optimize = 500
depth_per_read = 3

[namespaces]
prefix_template = "gen#"
hash_length = 12

[import]
name_attribute = "jcr:name"
attribute_scoping = "inherit-element-namespace"
property_element_policy = "no-properties"
skip_root_element = true
"#,
            index_dir_str
        )
    }

    fn with_config_env(config_path: &std::path::Path, f: impl FnOnce()) {
        let original = std::env::var("REPOGRAPH_CONFIG").ok();
        std::env::set_var("REPOGRAPH_CONFIG", config_path.to_str().unwrap());
        f();
        std::env::remove_var("REPOGRAPH_CONFIG");
        if let Some(val) = original {
            std::env::set_var("REPOGRAPH_CONFIG", val);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("repograph.toml");
        fs::write(&config_path, create_test_config(&temp_dir)).unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.repository.source_name, "cars");
            assert_eq!(config.index.max_changes_before_optimize, 500);
            assert_eq!(config.index.depth_per_read, 3);
            assert!(config.index.verify_workspaces);
            assert_eq!(config.namespaces.prefix_template, "gen#");
            assert_eq!(config.namespaces.hash_length, 12);
            assert_eq!(config.namespaces.fixed.len(), 4);
            assert_eq!(config.import.attribute_scoping, AttributeScoping::InheritElementNamespace);
            assert_eq!(config.import.property_element_policy, PropertyElementPolicy::NoProperties);
            assert!(config.import.skip_root_element);
            assert_eq!(config.import.type_attribute, "jcr:primaryType");
            assert!(config.index_directory().unwrap().ends_with("indexes"));
        });
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.repository.log_level, "info");
        assert!(config.index.directory.is_none());
        assert_eq!(config.index.depth_per_read, 10);
        assert_eq!(config.index.max_changes_before_optimize, 0);
        assert_eq!(config.namespaces.prefix_template, "ns000");
        assert_eq!(config.namespaces.hash_length, 10);
        assert_eq!(config.import.type_attribute_value, "nt:unstructured");
        assert_eq!(
            config.import.property_element_policy,
            PropertyElementPolicy::NoPropertiesOrTypeMarker
        );
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let err = Config::from_toml_str("[namespaces]\nhash_length = 2\n").unwrap_err();
        assert!(err.to_string().contains("hash_length"));
        let err = Config::from_toml_str("[index]\ndepth_per_read = 0\n").unwrap_err();
        assert!(err.to_string().contains("depth_per_read"));
        let err = Config::from_toml_str("[namespaces]\nprefix_template = \"a:b\"\n").unwrap_err();
        assert!(err.to_string().contains("prefix_template"));
        let err = Config::from_toml_str("[repository]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(err.to_string().contains("log_level"));
        assert!(Config::from_toml_str("[import]\nattribute_scoping = \"sideways\"\n").is_err());
    }

    #[test]
    fn test_index_directory_must_not_be_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        let text = format!(
            "[index]\ndirectory = \"{}\"\n",
            file.to_str().unwrap().replace('\\', "\\\\")
        );
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("index.directory"));
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("REPOGRAPH_CONFIG").ok();
        std::env::set_var("REPOGRAPH_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("REPOGRAPH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("REPOGRAPH_CONFIG", v);
        }
    }
}
