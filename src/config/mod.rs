//! Configuration management for siteindex
//!
//! Handles loading and validating configuration from a YAML file
//! (`config.yml` next to the binary by default).

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub db: DbConfig,

    #[serde(default)]
    pub sources: Vec<Source>,

    /// Parsed for compatibility; the HTML results page is not served here.
    #[serde(default, rename = "resultsPage")]
    pub results_page: ResultsPageConfig,
}

/// HTTP server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

/// Database driver selection; only `sqlite` is recognized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_driver")]
    pub driver: String,

    #[serde(default = "default_connection_string", rename = "connectionString")]
    pub connection_string: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            connection_string: default_connection_string(),
        }
    }
}

/// Search results page configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsPageConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Arbitrary HTML injected into the results page `<head>`.
    #[serde(default, rename = "customHTML")]
    pub custom_html: String,
}

/// A single site to index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Unique identifier; also used in per-source table names, so it is
    /// restricted to `[A-Za-z0-9_]+`.
    pub id: String,

    /// Base URL where crawling starts.
    pub url: String,

    /// Maximum requests per minute to this source.
    #[serde(default = "default_speed")]
    pub speed: u32,

    /// Maximum amount of text to index per page, in bytes.
    #[serde(default = "default_size_limit", rename = "sizeLimit")]
    pub size_limit: usize,

    #[serde(default, rename = "allowedDomains")]
    pub allowed_domains: Vec<String>,

    #[serde(default = "default_max_depth", rename = "maxDepth")]
    pub max_depth: i64,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
}

/// Re-crawl policy for content that has already been indexed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Minimum age before a page is refreshed, in days.
    #[serde(default = "default_refresh_min_age", rename = "minAge")]
    pub min_age: i64,
}

/// Per-source embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Maximum requests per minute to the embeddings API.
    #[serde(default = "default_embed_speed")]
    pub speed: u32,

    #[serde(default = "default_embed_batch_size", rename = "batchSize")]
    pub batch_size: i64,

    #[serde(default, rename = "openaiBaseUrl")]
    pub openai_base_url: String,

    #[serde(default, rename = "apiKey")]
    pub api_key: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub dimensions: usize,

    /// Maximum tokens per chunk.
    #[serde(default = "default_chunk_size", rename = "chunkSize")]
    pub chunk_size: usize,

    /// Token overlap between adjacent chunks.
    #[serde(default = "default_chunk_overlap", rename = "chunkOverlap")]
    pub chunk_overlap: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            speed: default_embed_speed(),
            batch_size: default_embed_batch_size(),
            openai_base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            dimensions: 0,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

static SOURCE_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z0-9_]+$").unwrap());

impl Config {
    /// Load and validate configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config: Config = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<()> {
        if self.db.driver != "sqlite" {
            return Err(Error::Config(format!(
                "unknown database driver: {}. Valid drivers include: sqlite.",
                self.db.driver
            )));
        }

        for src in &self.sources {
            if !SOURCE_ID_PATTERN.is_match(&src.id) {
                return Err(Error::Config(format!(
                    "invalid source ID: {}. Source IDs may only contain alphanumeric characters and underscores.",
                    src.id
                )));
            }
            if src.speed == 0 {
                return Err(Error::Config(format!(
                    "source {}: speed must be at least 1 request per minute",
                    src.id
                )));
            }
            if src.embeddings.enabled {
                let e = &src.embeddings;
                if e.model.is_empty() || e.openai_base_url.is_empty() {
                    return Err(Error::Config(format!(
                        "source {}: embeddings require a model and an openaiBaseUrl",
                        src.id
                    )));
                }
                if e.dimensions == 0 {
                    return Err(Error::Config(format!(
                        "source {}: embeddings.dimensions must be set",
                        src.id
                    )));
                }
                if e.speed == 0 || e.batch_size <= 0 {
                    return Err(Error::Config(format!(
                        "source {}: embeddings speed and batchSize must be positive",
                        src.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Find a configured source by id
    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }
}
