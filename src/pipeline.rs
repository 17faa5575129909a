// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch jobs: chunking the postings table and building the embedding index.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::embedding::{
    embed_in_batches, merge_weighted, ChunkConfig, EmbeddingProvider, IndexEntry, SentenceChunker,
};
use crate::model::{JobChunk, JobPosting};
use crate::services::Services;

/// Summary of a chunk transform run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TransformReport {
    pub postings: usize,
    pub chunks: usize,
    pub split_postings: usize,
}

/// Summary of an index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexReport {
    pub jobs_indexed: usize,
    pub jobs_skipped: usize,
    pub dimension: Option<usize>,
}

/// Stage selector for a `trans` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransMode {
    /// Chunk the source table into the destination table
    Embedding,
    /// Embed the chunk table into the vector index
    Datastore,
    All,
}

impl TransMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "embedding" => Some(Self::Embedding),
            "datastore" => Some(Self::Datastore),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// Body of a `trans` request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransRequest {
    #[serde(default)]
    pub mode: Option<String>,
}

/// Reports from the stages a `trans` request ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexReport>,
}

impl TransReport {
    pub fn is_empty(&self) -> bool {
        self.transform.is_none() && self.index.is_none()
    }
}

/// Runs the stages selected by `request`; an absent or unknown mode runs nothing.
pub fn run_trans(
    services: &mut Services,
    request: &TransRequest,
    show_progress: bool,
) -> Result<TransReport> {
    let mode = request.mode.as_deref().and_then(TransMode::parse);
    let Some(mode) = mode else {
        debug!("trans request without a known mode: {:?}", request.mode);
        return Ok(TransReport::default());
    };

    let mut report = TransReport::default();
    if matches!(mode, TransMode::Embedding | TransMode::All) {
        report.transform = Some(transform_postings(services)?);
    }
    if matches!(mode, TransMode::Datastore | TransMode::All) {
        report.index = Some(build_index(services, show_progress)?);
    }
    Ok(report)
}

fn chunker(services: &Services) -> Result<SentenceChunker> {
    Ok(SentenceChunker::new(ChunkConfig::new(
        services.settings.chunk_size,
    )?))
}

/// Chunks every posting of the source table into the destination table.
pub fn transform_postings(services: &mut Services) -> Result<TransformReport> {
    let source = services.settings.source_table.clone();
    let destination = services.settings.destination_table.clone();
    let chunker = chunker(services)?;

    let postings = services
        .warehouse
        .fetch_postings(&source)
        .with_context(|| format!("Failed to read postings from {}", source))?;
    let chunks = chunker.chunk_postings(&postings);
    let split_postings = postings
        .iter()
        .filter(|p| p.description.chars().count() > chunker.config().max_chunk_size)
        .count();

    services
        .warehouse
        .replace_chunks(&destination, &chunks)
        .with_context(|| format!("Failed to write chunks to {}", destination))?;

    info!(
        "chunked {} postings into {} rows of {} ({} split)",
        postings.len(),
        chunks.len(),
        destination,
        split_postings
    );
    Ok(TransformReport {
        postings: postings.len(),
        chunks: chunks.len(),
        split_postings,
    })
}

/// Embeds one document's chunks and merges them into a single vector.
///
/// Returns `None` when a split document has no non-empty chunk.
pub fn document_vector(
    provider: &mut dyn EmbeddingProvider,
    chunks: &[JobChunk],
) -> Result<Option<Vec<f32>>> {
    let all_split = !chunks.is_empty() && chunks.iter().all(|c| c.is_split);
    let kept: Vec<&JobChunk> = chunks
        .iter()
        .filter(|c| !all_split || c.chunk_size > 0)
        .collect();
    if kept.is_empty() {
        return Ok(None);
    }

    let texts: Vec<String> = kept.iter().map(|c| c.content.clone()).collect();
    let weights: Vec<f32> = kept.iter().map(|c| c.chunk_size as f32).collect();
    let vectors = embed_in_batches(provider, &texts)?;
    Ok(Some(merge_weighted(&vectors, &weights, all_split)?))
}

/// Chunks free text (a resume) and embeds it the same way as a posting.
pub fn embed_text(services: &mut Services, text: &str) -> Result<Option<Vec<f32>>> {
    let chunks = chunker(services)?.chunk_job("query", text);
    document_vector(services.embedder.as_mut(), &chunks)
}

fn group_by_job(chunks: Vec<JobChunk>) -> Vec<(String, Vec<JobChunk>)> {
    let mut order: Vec<(String, Vec<JobChunk>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for chunk in chunks {
        match positions.get(&chunk.job_id) {
            Some(&pos) => order[pos].1.push(chunk),
            None => {
                positions.insert(chunk.job_id.clone(), order.len());
                order.push((chunk.job_id.clone(), vec![chunk]));
            }
        }
    }
    order
}

fn metadata_for(posting: Option<&JobPosting>) -> serde_json::Value {
    match posting {
        Some(p) => json!({
            "title": p.title,
            "company": p.company,
            "location": p.location,
        }),
        None => json!({}),
    }
}

/// Rebuilds the vector index from the destination chunk table.
pub fn build_index(services: &mut Services, show_progress: bool) -> Result<IndexReport> {
    let source = services.settings.source_table.clone();
    let destination = services.settings.destination_table.clone();

    let chunks = services
        .warehouse
        .fetch_chunks(&destination)
        .with_context(|| format!("Failed to read chunks from {}", destination))?;
    let postings: HashMap<String, JobPosting> = if services.warehouse.table_exists(&source)? {
        services
            .warehouse
            .fetch_postings(&source)?
            .into_iter()
            .map(|p| (p.job_id.clone(), p))
            .collect()
    } else {
        warn!("source table {} missing; indexing without metadata", source);
        HashMap::new()
    };

    let jobs = group_by_job(chunks);
    let pb = if show_progress {
        ProgressBar::new(jobs.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} jobs | Embedding {msg}")
            .expect("valid progress bar template")
            .progress_chars("##."),
    );

    let mut report = IndexReport::default();
    let mut entries = Vec::with_capacity(jobs.len());
    for (job_id, job_chunks) in jobs {
        pb.set_message(job_id.clone());
        match document_vector(services.embedder.as_mut(), &job_chunks)
            .with_context(|| format!("Failed to embed job {}", job_id))?
        {
            Some(vector) => {
                report.dimension = Some(vector.len());
                entries.push(IndexEntry {
                    metadata: metadata_for(postings.get(&job_id)),
                    id: job_id,
                    vector,
                });
            }
            None => {
                debug!("job {} has no content; skipping", job_id);
                report.jobs_skipped += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    // swap only after every job embedded, so a failed rebuild keeps the old index
    services.index.replace_all(&entries)?;
    report.jobs_indexed = entries.len();
    info!(
        "indexed {} jobs ({} skipped)",
        report.jobs_indexed, report.jobs_skipped
    );
    Ok(report)
}
