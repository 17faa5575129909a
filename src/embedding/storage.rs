// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-based vector index for job embeddings.
//!
//! Stores one merged embedding per job posting together with display
//! metadata, and answers nearest-neighbour queries by brute-force cosine
//! similarity.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default embedding dimension for sentence-transformers/all-MiniLM-L6-v2.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// An entry to upsert into the index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Unique identifier (the job id)
    pub id: String,
    /// Embedding vector
    pub vector: Vec<f32>,
    /// Free-form JSON metadata returned with query results
    pub metadata: serde_json::Value,
}

/// A query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    /// Cosine similarity (-1.0 to 1.0)
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Nearest-neighbour index over job embeddings.
pub trait VectorIndex: Send {
    /// Inserts or replaces entries by id.
    fn upsert(&mut self, entries: &[IndexEntry]) -> Result<()>;

    /// Returns up to `top_k` entries sorted by descending similarity.
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<Neighbor>>;

    /// Number of stored entries.
    fn count(&self) -> Result<u64>;

    /// Replaces the whole index with `entries` atomically.
    ///
    /// The recorded dimension is reset. The previous contents stay
    /// queryable if the replacement fails.
    fn replace_all(&mut self, entries: &[IndexEntry]) -> Result<()>;
}

/// SQLite-backed [`VectorIndex`].
///
/// Stores vectors in `index.sqlite` under the data root by default.
pub struct SqliteVectorIndex {
    conn: Connection,
    path: PathBuf,
}

impl SqliteVectorIndex {
    /// Opens or creates an index at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        let index = Self { conn, path };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
            )
            .context("Failed to initialize index schema")?;
        Ok(())
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dimension recorded by the first upsert, if any.
    pub fn dimension(&self) -> Result<Option<usize>> {
        match self.get_meta("dimension")? {
            Some(raw) => Ok(Some(
                raw.parse()
                    .with_context(|| format!("Corrupt dimension value: {}", raw))?,
            )),
            None => Ok(None),
        }
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to get meta")
    }

    fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO meta (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Converts an embedding vector to a compact blob.
    fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Converts a blob back to an embedding vector.
    fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Computes cosine similarity between two vectors.
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if magnitude_a == 0.0 || magnitude_b == 0.0 {
            return 0.0;
        }

        dot_product / (magnitude_a * magnitude_b)
    }

    fn check_dimension(entries: &[IndexEntry], expected: usize) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
            bail!(
                "Vector for '{}' has dimension {}, index expects {}",
                bad.id,
                bad.vector.len(),
                expected
            );
        }
        Ok(())
    }

    fn write_entries(conn: &Connection, entries: &[IndexEntry], dimension: usize) -> Result<()> {
        let updated_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        Self::set_meta(conn, "dimension", &dimension.to_string())?;
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO vectors (id, embedding, metadata, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                embedding = excluded.embedding,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )?;
        for entry in entries {
            stmt.execute(params![
                entry.id,
                Self::embedding_to_blob(&entry.vector),
                entry.metadata.to_string(),
                updated_at
            ])?;
        }
        Ok(())
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn upsert(&mut self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let expected = match self.dimension()? {
            Some(dim) => dim,
            None => entries[0].vector.len(),
        };
        Self::check_dimension(entries, expected)?;

        let tx = self.conn.transaction()?;
        Self::write_entries(&tx, entries, expected)?;
        tx.commit()?;

        debug!("upserted {} vectors into {}", entries.len(), self.path.display());
        Ok(())
    }

    fn replace_all(&mut self, entries: &[IndexEntry]) -> Result<()> {
        // the stored dimension is discarded with the old entries
        if let Some(first) = entries.first() {
            Self::check_dimension(entries, first.vector.len())?;
        }

        let tx = self.conn.transaction()?;
        tx.execute_batch(
            r#"
            DELETE FROM vectors;
            DELETE FROM meta WHERE key = 'dimension';
            "#,
        )
        .context("Failed to clear index")?;
        if let Some(first) = entries.first() {
            Self::write_entries(&tx, entries, first.vector.len())?;
        }
        tx.commit()?;

        debug!("replaced index with {} vectors", entries.len());
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<Neighbor>> {
        if let Some(dim) = self.dimension()? {
            if dim != vector.len() {
                bail!(
                    "Query vector has dimension {}, index expects {}",
                    vector.len(),
                    dim
                );
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id, embedding, metadata FROM vectors")?;

        let mut results: Vec<Neighbor> = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let metadata: String = row.get(2)?;
                Ok((id, blob, metadata))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to scan vectors")?
            .into_iter()
            .map(|(id, blob, metadata)| {
                let embedding = Self::blob_to_embedding(&blob);
                Neighbor {
                    score: Self::cosine_similarity(vector, &embedding),
                    metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                    id,
                }
            })
            .collect();

        // Sort by score (descending), ties by id for stable output
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);

        Ok(results)
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            metadata: json!({ "title": id }),
        }
    }

    #[test]
    fn test_index_create_and_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("index.sqlite");

        let mut index = SqliteVectorIndex::open(&db_path).unwrap();
        index.upsert(&[entry("a", vec![1.0, 0.0])]).unwrap();
        assert!(db_path.exists());
        drop(index);

        let index = SqliteVectorIndex::open(&db_path).unwrap();
        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.dimension().unwrap(), Some(2));
    }

    #[test]
    fn test_similarity_query() {
        let dir = tempdir().unwrap();
        let mut index = SqliteVectorIndex::open(dir.path().join("index.sqlite")).unwrap();

        index
            .upsert(&[
                entry("a", vec![1.0, 0.0, 0.0]),
                entry("b", vec![0.0, 1.0, 0.0]),
                entry("c", vec![0.9, 0.1, 0.0]),
            ])
            .unwrap();

        let results = index.query(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "c");
        assert!((results[0].score - 1.0).abs() < 0.0001);
        assert_eq!(results[0].metadata["title"], "a");
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let dir = tempdir().unwrap();
        let mut index = SqliteVectorIndex::open(dir.path().join("index.sqlite")).unwrap();

        index.upsert(&[entry("a", vec![1.0, 0.0])]).unwrap();
        index.upsert(&[entry("a", vec![0.0, 1.0])]).unwrap();
        assert_eq!(index.count().unwrap(), 1);

        let results = index.query(&[0.0, 1.0], 1).unwrap();
        assert!((results[0].score - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let mut index = SqliteVectorIndex::open(dir.path().join("index.sqlite")).unwrap();

        index.upsert(&[entry("a", vec![1.0, 0.0])]).unwrap();
        assert!(index.upsert(&[entry("b", vec![1.0, 0.0, 0.0])]).is_err());
        assert!(index.query(&[1.0], 5).is_err());
    }

    #[test]
    fn test_replace_all_swaps_contents() {
        let dir = tempdir().unwrap();
        let mut index = SqliteVectorIndex::open(dir.path().join("index.sqlite")).unwrap();

        index
            .upsert(&[entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])])
            .unwrap();
        index
            .replace_all(&[entry("c", vec![1.0, 0.0, 0.0])])
            .unwrap();
        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.dimension().unwrap(), Some(3));
        assert_eq!(index.query(&[1.0, 0.0, 0.0], 5).unwrap()[0].id, "c");

        index.replace_all(&[]).unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert_eq!(index.dimension().unwrap(), None);
    }

    #[test]
    fn test_replace_all_rejects_mixed_dimensions_and_keeps_old_entries() {
        let dir = tempdir().unwrap();
        let mut index = SqliteVectorIndex::open(dir.path().join("index.sqlite")).unwrap();

        index.upsert(&[entry("a", vec![1.0, 0.0])]).unwrap();
        assert!(index
            .replace_all(&[entry("b", vec![1.0]), entry("c", vec![1.0, 0.0])])
            .is_err());
        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.dimension().unwrap(), Some(2));
    }
}
