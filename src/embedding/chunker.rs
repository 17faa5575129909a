// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sentence-aligned text chunker for embedding generation.
//!
//! Long job descriptions are cut into pieces no longer than a configured
//! number of characters. Each cut is placed just after the last period that
//! falls inside the size window; when the window holds no usable period the
//! text is hard-cut at the window size.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::model::{JobChunk, JobPosting};

/// Default maximum chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Configuration for the sentence chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum number of characters per chunk.
    pub max_chunk_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkConfig {
    /// Creates a config, rejecting a zero chunk size.
    pub fn new(max_chunk_size: usize) -> Result<Self, CoreError> {
        if max_chunk_size == 0 {
            return Err(CoreError::InvalidArgument(
                "max_size must be greater than 0".to_string(),
            ));
        }
        Ok(Self { max_chunk_size })
    }
}

/// A trimmed chunk of text and its character count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub size: usize,
}

impl Chunk {
    fn from_raw(raw: &str) -> Self {
        let content = raw.trim().to_string();
        let size = content.chars().count();
        Self { content, size }
    }
}

/// Splits `text` into trimmed chunks of at most `max_size` characters.
///
/// Text that already fits yields exactly one chunk, even when empty.
pub fn chunk(text: &str, max_size: usize) -> Result<Vec<Chunk>, CoreError> {
    Ok(split_raw(text, max_size)?
        .into_iter()
        .map(Chunk::from_raw)
        .collect())
}

/// Returns the untrimmed slices that [`chunk`] is built from.
///
/// Concatenating the slices in order reproduces `text` exactly.
pub fn split_raw(text: &str, max_size: usize) -> Result<Vec<&str>, CoreError> {
    if max_size == 0 {
        return Err(CoreError::InvalidArgument(
            "max_size must be greater than 0".to_string(),
        ));
    }

    if text.chars().count() <= max_size {
        return Ok(vec![text]);
    }

    let mut slices = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        // a remainder that fits is the final chunk, periods or not
        if rest.chars().count() <= max_size {
            slices.push(rest);
            break;
        }
        let (head, tail) = rest.split_at(split_point(rest, max_size));
        slices.push(head);
        rest = tail;
    }
    Ok(slices)
}

/// Byte offset just past the next chunk of `rest`.
///
/// The period search covers char positions `0..=max_size`; a period at
/// position 0 does not count. The hard cut takes exactly `max_size` chars.
fn split_point(rest: &str, max_size: usize) -> usize {
    let byte_at = |n: usize| {
        rest.char_indices()
            .nth(n)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len())
    };

    let window_end = byte_at(max_size + 1);
    match rest[..window_end].rfind('.') {
        // '.' is one byte, so the chunk ends right after it
        Some(pos) if pos > 0 => pos + 1,
        _ => byte_at(max_size),
    }
}

/// Chunks job descriptions into chunk-table rows.
pub struct SentenceChunker {
    config: ChunkConfig,
}

impl SentenceChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Splits free text using the configured size.
    pub fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        // max_chunk_size is validated by ChunkConfig::new
        chunk(text, self.config.max_chunk_size.max(1)).unwrap_or_default()
    }

    /// Produces chunk rows for one posting.
    ///
    /// `is_split` is false exactly when the description fit in one chunk.
    pub fn chunk_job(&self, job_id: &str, description: &str) -> Vec<JobChunk> {
        let is_split = description.chars().count() > self.config.max_chunk_size;
        self.chunk_text(description)
            .into_iter()
            .map(|c| JobChunk {
                job_id: job_id.to_string(),
                content: c.content,
                chunk_size: c.size as i64,
                is_split,
            })
            .collect()
    }

    /// Chunks many postings in parallel, keeping posting order.
    pub fn chunk_postings(&self, postings: &[JobPosting]) -> Vec<JobChunk> {
        postings
            .par_iter()
            .map(|p| self.chunk_job(&p.job_id, &p.description))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}
