//! Store configuration.
//!
//! Loads and validates configuration from YAML files or environment variables.

use roost_hnsw::{DiskIndexConfig, HnswConfig};
use roost_vector::DistanceFunction;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Example YAML:
/// ```yaml
/// hnsw:
///   m: 16
///   ef_construction: 200
///   ef_search: 100
/// index:
///   distance: cosine
///   consolidate_every: 1024
/// sync:
///   page_size: 500
/// store:
///   auto_rebuild: true
///   input_extensions: ["wav", "flac"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoostConfig {
    /// HNSW graph parameters
    #[serde(default)]
    pub hnsw: HnswConfig,

    /// Vector index persistence
    #[serde(default)]
    pub index: IndexConfig,

    /// Aggregate sync
    #[serde(default)]
    pub sync: SyncConfig,

    /// Store open behaviour and input discovery
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub distance: DistanceFunction,

    /// Logged inserts that trigger a snapshot (0 disables)
    #[serde(default = "default_consolidate_every")]
    pub consolidate_every: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            distance: DistanceFunction::Cosine,
            consolidate_every: default_consolidate_every(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Source records read per query
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Rebuild a corrupt vector index while opening the store
    #[serde(default = "default_auto_rebuild")]
    pub auto_rebuild: bool,

    /// File extensions (case-insensitive) that mark a directory as holding input
    #[serde(default = "default_input_extensions")]
    pub input_extensions: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_rebuild: default_auto_rebuild(),
            input_extensions: default_input_extensions(),
        }
    }
}

fn default_consolidate_every() -> usize {
    1024
}

fn default_page_size() -> usize {
    500
}

fn default_auto_rebuild() -> bool {
    true
}

fn default_input_extensions() -> Vec<String> {
    vec!["wav".to_string()]
}

impl RoostConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: RoostConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables, defaulting the rest.
    ///
    /// Supported variables:
    /// - ROOST_DISTANCE (cosine | euclidean | inner_product)
    /// - ROOST_CONSOLIDATE_EVERY
    /// - ROOST_EF_SEARCH
    /// - ROOST_SYNC_PAGE_SIZE
    /// - ROOST_AUTO_REBUILD (true | false)
    /// - ROOST_INPUT_EXTENSIONS (comma-separated)
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = RoostConfig::default();

        if let Ok(v) = std::env::var("ROOST_DISTANCE") {
            config.index.distance = serde_yaml::from_str(&v)
                .map_err(|e| ConfigError::InvalidField(format!("ROOST_DISTANCE: {}", e)))?;
        }
        if let Ok(v) = std::env::var("ROOST_CONSOLIDATE_EVERY") {
            config.index.consolidate_every = parse_env("ROOST_CONSOLIDATE_EVERY", &v)?;
        }
        if let Ok(v) = std::env::var("ROOST_EF_SEARCH") {
            config.hnsw.ef_search = parse_env("ROOST_EF_SEARCH", &v)?;
        }
        if let Ok(v) = std::env::var("ROOST_SYNC_PAGE_SIZE") {
            config.sync.page_size = parse_env("ROOST_SYNC_PAGE_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("ROOST_AUTO_REBUILD") {
            config.store.auto_rebuild = parse_env("ROOST_AUTO_REBUILD", &v)?;
        }
        if let Ok(v) = std::env::var("ROOST_INPUT_EXTENSIONS") {
            config.store.input_extensions = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hnsw
            .validate()
            .map_err(|e| ConfigError::InvalidField(e.to_string()))?;

        if self.sync.page_size == 0 {
            return Err(ConfigError::InvalidField(
                "sync.page_size must be > 0".to_string(),
            ));
        }

        if self.store.input_extensions.is_empty() {
            return Err(ConfigError::InvalidField(
                "store.input_extensions cannot be empty".to_string(),
            ));
        }
        for ext in &self.store.input_extensions {
            if ext.is_empty() || ext.contains('.') || ext.contains('/') {
                return Err(ConfigError::InvalidField(format!(
                    "invalid input extension {:?}",
                    ext
                )));
            }
        }

        Ok(())
    }

    /// Parameters for the on-disk vector index.
    pub fn index_config(&self) -> DiskIndexConfig {
        DiskIndexConfig {
            hnsw: self.hnsw.clone(),
            distance: self.index.distance,
            consolidate_every: self.index.consolidate_every,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidField(format!("{}: {}", name, e)))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}
