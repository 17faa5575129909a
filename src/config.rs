// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for jobmatch
//!
//! Loads configuration from .jobmatchrc.toml in current directory or
//! ~/.config/jobmatch/config.toml, then applies environment overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::embedding::{DEFAULT_CHUNK_SIZE, DEFAULT_EMBEDDING_DIM};
use crate::warehouse::DEFAULT_MAX_BAD_RECORDS;

/// Output format for results (mirrored from cli for library use)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOutputFormat {
    #[default]
    Text,
    Json,
}

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    #[default]
    Builtin,
    Command,
    OpenAi,
    Dummy,
}

/// Text generation provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderType {
    OpenAi,
    Command,
    #[default]
    Template,
}

/// Warehouse configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// SQLite database path (relative to the data root)
    pub path: Option<String>,
    /// Table holding raw job postings
    pub source_table: Option<String>,
    /// Table receiving description chunks
    pub destination_table: Option<String>,
    /// Maximum chunk size in characters
    pub chunk_size: Option<usize>,
    /// Malformed CSV rows tolerated per load
    pub max_bad_records: Option<usize>,
}

impl WarehouseConfig {
    /// Get database path (defaults to "warehouse.sqlite")
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("warehouse.sqlite")
    }

    /// Get source table (defaults to "job_posts")
    pub fn source_table(&self) -> &str {
        self.source_table.as_deref().unwrap_or("job_posts")
    }

    /// Get destination table (defaults to "job_chunks")
    pub fn destination_table(&self) -> &str {
        self.destination_table.as_deref().unwrap_or("job_chunks")
    }

    /// Get chunk size (defaults to 1000)
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Get max bad records (defaults to 100)
    pub fn max_bad_records(&self) -> usize {
        self.max_bad_records.unwrap_or(DEFAULT_MAX_BAD_RECORDS)
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (builtin, command, openai, dummy)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Vector dimension (dummy provider, optional for openai)
    pub dimension: Option<usize>,
    /// Base URL for the openai provider
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier; the default depends on the provider
    pub fn model(&self) -> &str {
        match (self.model.as_deref(), self.provider()) {
            (Some(model), _) => model,
            (None, EmbeddingProviderType::OpenAi) => "text-embedding-3-small",
            (None, EmbeddingProviderType::Dummy) => "dummy",
            (None, _) => "minilm",
        }
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get dimension (defaults to 384)
    pub fn dimension(&self) -> usize {
        self.dimension.unwrap_or(DEFAULT_EMBEDDING_DIM)
    }

    /// Get base URL (defaults to the OpenAI API)
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
    }

    /// Get API key variable name (defaults to "OPENAI_API_KEY")
    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
    }

    /// Get timeout in seconds (defaults to 30)
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(30)
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// SQLite database path (relative to the data root)
    pub path: Option<String>,
    /// Number of neighbours returned for a resume
    pub top_k: Option<usize>,
}

impl IndexConfig {
    /// Get index path (defaults to "index.sqlite")
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("index.sqlite")
    }

    /// Get top k (defaults to 5)
    pub fn top_k(&self) -> usize {
        self.top_k.unwrap_or(5)
    }
}

/// Text generation configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Provider type (openai, command, template)
    pub provider: Option<GenerationProviderType>,
    pub model: Option<String>,
    pub command: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
}

impl GenerationConfig {
    /// Get provider type (defaults to Template)
    pub fn provider(&self) -> GenerationProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model (defaults to "gpt-4o-mini")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("gpt-4o-mini")
    }

    /// Get command (defaults to "generator")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("generator")
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
    }

    /// Get max tokens (defaults to 600)
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(600)
    }

    /// Get temperature (defaults to 0.4)
    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(0.4)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(60)
    }
}

/// Document store configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Root directory for folders and uploaded objects
    pub root: Option<String>,
}

impl DriveConfig {
    /// Get drive root (defaults to "drive")
    pub fn root(&self) -> &str {
        self.root.as_deref().unwrap_or("drive")
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: Option<String>,
}

impl ServerConfig {
    /// Get bind address (defaults to "127.0.0.1:8080")
    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or("127.0.0.1:8080")
    }
}

/// Configuration loaded from .jobmatchrc.toml or ~/.config/jobmatch/config.toml
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default output format (text or json)
    pub default_format: Option<String>,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub drive: DriveConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .jobmatchrc.toml in the data directory
    /// 2. ~/.config/jobmatch/config.toml
    pub fn load(data_root: &Path) -> Self {
        if let Some(config) = Self::load_from_path(&data_root.join(".jobmatchrc.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("jobmatch").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match Self::parse(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Warning: Failed to parse {}: {:#}", path.display(), e);
                None
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid configuration")
    }

    /// Applies `SOURCE_TABLE`, `DESTINATION_TABLE`, `CHUNK_SIZE` (or
    /// `CHONK_SIZE`) and `JOBMATCH_BIND` on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(table) = env_string("SOURCE_TABLE")? {
            self.warehouse.source_table = Some(table);
        }
        if let Some(table) = env_string("DESTINATION_TABLE")? {
            self.warehouse.destination_table = Some(table);
        }
        let chunk_size = match env_usize("CHUNK_SIZE")? {
            Some(size) => Some(size),
            None => env_usize("CHONK_SIZE")?,
        };
        if chunk_size.is_some() {
            self.warehouse.chunk_size = chunk_size;
        }
        if let Some(bind) = env_string("JOBMATCH_BIND")? {
            self.server.bind = Some(bind);
        }
        Ok(())
    }

    /// Get output format from config, parsing the string to ConfigOutputFormat
    pub fn output_format(&self) -> Option<ConfigOutputFormat> {
        self.default_format
            .as_ref()
            .and_then(|s| match s.to_lowercase().as_str() {
                "json" => Some(ConfigOutputFormat::Json),
                "text" => Some(ConfigOutputFormat::Text),
                _ => None,
            })
    }

    pub fn warehouse_path(&self, data_root: &Path) -> PathBuf {
        resolve(data_root, self.warehouse.path())
    }

    pub fn index_path(&self, data_root: &Path) -> PathBuf {
        resolve(data_root, self.index.path())
    }

    pub fn drive_root(&self, data_root: &Path) -> PathBuf {
        resolve(data_root, self.drive.root())
    }
}

fn resolve(data_root: &Path, configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_root.join(path)
    }
}

fn env_string(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(raw.trim().to_string())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    env_string(name)?
        .map(|value| {
            value
                .parse::<usize>()
                .with_context(|| format!("Invalid {} value: {}", name, value))
        })
        .transpose()
}
