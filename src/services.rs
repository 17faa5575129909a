// SPDX-License-Identifier: MIT OR Apache-2.0

//! Service bundle shared by the jobs, the webhook and the HTTP front end.

use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, EmbeddingProviderType, GenerationProviderType};
use crate::drive::{DocumentStore, LocalDrive};
use crate::embedding::provider::parse_model_name;
use crate::embedding::{
    CommandProvider, DummyProvider, EmbeddingProvider, EmbeddingProviderConfig, FastEmbedder,
    OpenAiEmbedder, SqliteVectorIndex, VectorIndex,
};
use crate::generation::{CommandGenerator, OpenAiGenerator, TemplateGenerator, TextGenerator};
use crate::warehouse::{CsvLoadOptions, SqliteWarehouse, Warehouse};

/// Job-level settings resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    pub source_table: String,
    pub destination_table: String,
    pub chunk_size: usize,
    pub top_k: usize,
    pub max_bad_records: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl JobSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_table: config.warehouse.source_table().to_string(),
            destination_table: config.warehouse.destination_table().to_string(),
            chunk_size: config.warehouse.chunk_size(),
            top_k: config.index.top_k(),
            max_bad_records: config.warehouse.max_bad_records(),
            max_tokens: config.generation.max_tokens(),
            temperature: config.generation.temperature(),
        }
    }

    pub fn csv_options(&self) -> CsvLoadOptions {
        CsvLoadOptions {
            max_bad_records: self.max_bad_records,
            ..CsvLoadOptions::default()
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One instance of every external service.
pub struct Services {
    pub warehouse: Box<dyn Warehouse>,
    pub embedder: Box<dyn EmbeddingProvider>,
    pub index: Box<dyn VectorIndex>,
    pub generator: Box<dyn TextGenerator>,
    pub drive: Box<dyn DocumentStore>,
    pub settings: JobSettings,
}

impl Services {
    /// Builds the services described by `config`, resolving paths against `data_root`.
    pub fn from_config(config: &Config, data_root: &Path) -> Result<Self> {
        let warehouse = SqliteWarehouse::open(config.warehouse_path(data_root))?;
        let index = SqliteVectorIndex::open(config.index_path(data_root))?;
        let drive = LocalDrive::new(config.drive_root(data_root))?;
        let embedder = build_embedder(config)?;
        let generator = build_generator(config)?;
        info!(
            "services ready (embeddings: {}, generation: {})",
            embedder.model_id(),
            generator.model_id()
        );

        Ok(Self {
            warehouse: Box::new(warehouse),
            embedder,
            index: Box::new(index),
            generator,
            drive: Box::new(drive),
            settings: JobSettings::from_config(config),
        })
    }
}

fn api_key(var: &str) -> Result<String> {
    env::var(var).with_context(|| format!("{} is not set", var))
}

fn build_embedder(config: &Config) -> Result<Box<dyn EmbeddingProvider>> {
    let embeddings = &config.embeddings;
    let provider: Box<dyn EmbeddingProvider> = match embeddings.provider() {
        EmbeddingProviderType::Builtin => {
            let mut provider_config = EmbeddingProviderConfig::from_env()?;
            if let Some(model) = embeddings.model.as_deref() {
                provider_config.model = parse_model_name(model)?;
            }
            Box::new(FastEmbedder::new(provider_config)?)
        }
        EmbeddingProviderType::Command => Box::new(CommandProvider::new(
            embeddings.command().to_string(),
            embeddings.model().to_string(),
        )),
        EmbeddingProviderType::OpenAi => Box::new(OpenAiEmbedder::new(
            &api_key(embeddings.api_key_env())?,
            embeddings.base_url(),
            embeddings.model().to_string(),
            embeddings.dimension,
            Duration::from_secs(embeddings.timeout_secs()),
        )?),
        EmbeddingProviderType::Dummy => Box::new(DummyProvider::new(embeddings.dimension())),
    };
    Ok(provider)
}

fn build_generator(config: &Config) -> Result<Box<dyn TextGenerator>> {
    let generation = &config.generation;
    let generator: Box<dyn TextGenerator> = match generation.provider() {
        GenerationProviderType::OpenAi => Box::new(OpenAiGenerator::new(
            &api_key(generation.api_key_env())?,
            generation.base_url(),
            generation.model().to_string(),
            Duration::from_secs(generation.timeout_secs()),
        )?),
        GenerationProviderType::Command => Box::new(CommandGenerator::new(
            generation.command().to_string(),
            generation.model().to_string(),
        )),
        GenerationProviderType::Template => Box::new(TemplateGenerator),
    };
    Ok(generator)
}
