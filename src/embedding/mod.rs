// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - chunking, vector merge, providers and the vector index
//!
//! Job descriptions are split into sentence-aligned chunks, each chunk is
//! embedded, and the chunk vectors are merged into one length-weighted vector
//! per posting before being stored for nearest-neighbour search.

pub mod chunker;
pub mod merge;
pub mod provider;
pub mod storage;

pub use chunker::{chunk, split_raw, Chunk, ChunkConfig, SentenceChunker, DEFAULT_CHUNK_SIZE};
pub use merge::merge_weighted;
pub use provider::{
    embed_in_batches, CommandProvider, DummyProvider, EmbeddingProvider, EmbeddingProviderConfig,
    FastEmbedder, OpenAiEmbedder,
};
pub use storage::{IndexEntry, Neighbor, SqliteVectorIndex, VectorIndex, DEFAULT_EMBEDDING_DIM};
