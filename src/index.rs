//! SQLite-backed vector index, partitioned per asset.
//!
//! Chunk text and embedding vectors live in sibling tables keyed by chunk
//! id; every row carries its `asset_id`, so searches only ever touch one
//! asset's partition and cross-asset queries cannot leak. Similarity is
//! cosine, computed in Rust over the partition's vectors.

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::Result;
use crate::models::{Chunk, RetrievedChunk};

#[derive(Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
}

impl VectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write a batch of chunks and their vectors into the asset's
    /// partition. Idempotent by chunk id, and atomic: a concurrent reader
    /// sees either none or all of the batch.
    ///
    /// `vectors` must be parallel to `chunks`.
    pub async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, asset_id, chunk_index, text, start_offset, end_offset, page)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    start_offset = excluded.start_offset,
                    end_offset = excluded.end_offset,
                    page = excluded.page
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.asset_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.start_offset)
            .bind(chunk.end_offset)
            .bind(chunk.page)
            .execute(&mut *tx)
            .await?;

            let blob = vec_to_blob(vector);
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, asset_id, embedding)
                VALUES (?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    asset_id = excluded.asset_id,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.asset_id)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Top-`k` chunks of the asset's partition by cosine similarity to
    /// `query_vector`. Results are ordered by descending score, ties broken
    /// by chunk id ascending for determinism.
    pub async fn search(
        &self,
        asset_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.embedding, c.chunk_index, c.text, c.page
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.asset_id = ?
            "#,
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                RetrievedChunk {
                    chunk_id: row.get("chunk_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    page: row.get("page"),
                    score: cosine_similarity(query_vector, &vector),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(k);

        Ok(candidates)
    }

    /// Remove every chunk and vector belonging to the asset. Calling this
    /// for an unknown asset is a no-op, not an error.
    pub async fn delete_asset(&self, asset_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE asset_id = ?")
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE asset_id = ?")
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Number of chunks stored for the asset.
    pub async fn chunk_count(&self, asset_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE asset_id = ?")
            .bind(asset_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
