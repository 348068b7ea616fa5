//! Persistent vector index over document chunks.
//!
//! Owns every embedding record: (chunk text, vector, source filename).
//! Records are created at ingestion time and never mutated or deleted.
//! Storage is SQLite (chunk text in `chunks`, vectors as little-endian
//! f32 BLOBs in `chunk_vectors`), so a restart restores the index from
//! the database file at the configured path.
//!
//! Writes happen inside a single transaction under a writer lock; reads
//! take the shared side of the lock and see either the pre-insert or
//! post-insert state, never a half-persisted document.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tokio::sync::RwLock;

use crate::embedding::{self, Embedder};
use crate::migrate;
use crate::models::{Chunk, RetrievedChunk};

/// Search-side failure of the vector index.
#[derive(Debug)]
pub enum IndexError {
    /// No documents have ever been indexed.
    Empty,
    Storage(anyhow::Error),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Empty => write!(f, "vector index is empty"),
            IndexError::Storage(e) => write!(f, "vector index storage error: {}", e),
        }
    }
}

impl std::error::Error for IndexError {}

pub struct VectorIndex {
    pool: SqlitePool,
    /// Writer lock: inserts are mutually exclusive; searches share.
    lock: RwLock<()>,
}

impl VectorIndex {
    /// Open the index at `db_path`, creating the schema if needed.
    ///
    /// Called once at startup. An absent database file starts the index
    /// empty; previously persisted records are visible immediately.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = crate::db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            lock: RwLock::new(()),
        })
    }

    /// Embed and persist a batch of chunks.
    ///
    /// The write is transactional and completes before this returns: once
    /// the call succeeds the records survive a crash, and a failed call
    /// leaves previously committed records untouched. Concurrent inserts
    /// serialize on the writer lock, so none is lost.
    pub async fn insert(
        &self,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        // Embedding happens outside the writer lock; only persistence
        // needs mutual exclusion.
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            vectors.extend(embedder.embed_texts(&texts).await?);
        }

        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let _guard = self.lock.write().await;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source, chunk_index, text, first_page, last_page, hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.pages.0 as i64)
            .bind(chunk.pages.1 as i64)
            .bind(&chunk.hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, model, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(embedder.model_name())
            .bind(embedder.dims() as i64)
            .bind(embedding::vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    /// Return the `k` records nearest to `query_vec` by cosine similarity,
    /// nearest-first. Returns fewer than `k` when the index holds fewer
    /// records, and [`IndexError::Empty`] when it holds none.
    pub async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        let _guard = self.lock.read().await;

        let rows = sqlx::query(
            r#"
            SELECT c.source, c.text, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexError::Storage(e.into()))?;

        if rows.is_empty() {
            return Err(IndexError::Empty);
        }

        let mut scored: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                RetrievedChunk {
                    source: row.get("source"),
                    text: row.get("text"),
                    score: embedding::cosine_similarity(query_vec, &vec),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Number of embedding records currently persisted.
    pub async fn len(&self) -> Result<u64> {
        let _guard = self.lock.read().await;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
