//! Application configuration.
//!
//! Loaded from a TOML file; every field has a default so a missing file
//! or a partial file both work.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::search::EmbeddingModelKind;

/// Default catalog location.
pub const DEFAULT_CATALOG_URL: &str =
    "https://raw.githubusercontent.com/bsbodden/redis_vss_getting_started/main/data/bikes.json";

/// Default search index name.
pub const DEFAULT_INDEX_NAME: &str = "idx:bikes_vss";

/// Queries run by the `report` command when none are configured.
pub const DEFAULT_QUERIES: &[&str] = &[
    "Bike for small kids",
    "Best Mountain bikes for kids",
    "Cheap Mountain bike for kids",
    "Female specific mountain bike",
    "Road bike for beginners",
    "Commuter bike for people over 60",
    "Comfortable commuter bike",
    "Good bike for college students",
    "Mountain bike for beginners",
    "Vintage bike",
    "Comfortable city bike",
];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub catalog: CatalogConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
}

/// Which document store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// In-process store; contents are lost when the process exits.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            host: "localhost".to_string(),
            port: 6379,
        }
    }
}

impl StoreConfig {
    /// Connection URL for the Redis client.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON array of bike records.
    pub url: String,
    /// HTTP timeout for the catalog fetch.
    pub timeout_secs: u64,
    /// Prefix shared by every catalog document key.
    pub key_prefix: String,
    /// Zero-pad width of the sequence number in document keys.
    pub key_width: usize,
    /// Number of records the catalog is expected to hold. The key of the
    /// last one is probed to decide whether seeding already happened.
    pub expected_records: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_string(),
            timeout_secs: 10,
            key_prefix: "bikes:".to_string(),
            key_width: 3,
            expected_records: 11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: EmbeddingModelKind,
    /// Vector dimension declared in the index schema.
    pub dimension: usize,
    /// Document field the text to embed is read from.
    pub source_field: String,
    /// Document field the vector is written to.
    pub field: String,
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let model = EmbeddingModelKind::default();
        Self {
            model,
            dimension: model.dimension(),
            source_field: "description".to_string(),
            field: "description_embedding".to_string(),
            show_download_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub name: String,
    /// Attribute name the vector field is exposed under in queries.
    pub vector_alias: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_INDEX_NAME.to_string(),
            vector_alias: "vector".to_string(),
        }
    }
}

/// Order in which hits are returned, by score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest cosine distance (most similar) first.
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub k: usize,
    pub score_alias: String,
    /// Fields returned for every hit.
    pub return_fields: Vec<String>,
    pub sort: SortDirection,
    /// Pre-filter applied before KNN ranking. `*` matches everything.
    pub filter: String,
    pub queries: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k: 3,
            score_alias: "vector_score".to_string(),
            return_fields: ["vector_score", "brand", "model", "description"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sort: SortDirection::Ascending,
            filter: "*".to_string(),
            queries: DEFAULT_QUERIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check invariants that would otherwise only show up as bad rankings.
    pub fn validate(&self) -> Result<()> {
        let native = self.embedding.model.dimension();
        if self.embedding.dimension != native {
            return Err(Error::Config(format!(
                "embedding.dimension is {} but embedding.model '{}' produces {}-dimensional vectors; set embedding.dimension = {}",
                self.embedding.dimension, self.embedding.model, native, native
            )));
        }
        if self.search.k == 0 {
            return Err(Error::Config("search.k must be at least 1".into()));
        }
        if self.catalog.key_prefix.is_empty() {
            return Err(Error::Config("catalog.key_prefix must not be empty".into()));
        }
        if self.catalog.expected_records == 0 {
            return Err(Error::Config(
                "catalog.expected_records must be at least 1".into(),
            ));
        }
        let digits = self.catalog.expected_records.to_string().len();
        if digits > self.catalog.key_width {
            return Err(Error::Config(format!(
                "catalog.key_width {} cannot hold {} records; keys would stop sorting numerically",
                self.catalog.key_width, self.catalog.expected_records
            )));
        }
        if self.embedding.field.is_empty() || self.embedding.source_field.is_empty() {
            return Err(Error::Config("embedding field names must not be empty".into()));
        }
        Ok(())
    }
}
