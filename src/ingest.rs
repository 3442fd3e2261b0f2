//! Ingestion pipeline: load → chunk → embed → index.
//!
//! Runs synchronously and returns once the asset is `Indexed` (or the
//! specific stage error once it is `Failed`). Loader errors happen before
//! the asset row is created, so an unreadable path never leaves a partial
//! asset. Later stage errors mark the asset `Failed`, wipe any partition
//! rows written so far, and surface the error unchanged.

use log::{info, warn};
use std::path::Path;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Result, ServiceError};
use crate::index::VectorIndex;
use crate::loader;
use crate::models::{AssetStatus, Chunk};
use crate::registry::AssetRegistry;

/// Result of a completed ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub asset_id: String,
    pub chunk_count: i64,
    pub status: AssetStatus,
}

/// Ingest one document and return its asset id once indexed.
pub async fn process_document(
    config: &Config,
    registry: &AssetRegistry,
    index: &VectorIndex,
    embedder: &dyn Embedder,
    path: &Path,
) -> Result<IngestOutcome> {
    // Load first: loader failures must not create an asset row.
    let doc = loader::load(path)?;

    let asset_id = registry.create(&path.to_string_lossy()).await?;

    match index_document(config, index, embedder, &asset_id, &doc).await {
        Ok(chunk_count) => {
            registry.mark_indexed(&asset_id, chunk_count).await?;
            info!(
                "indexed asset {} ({} chunks from {})",
                asset_id,
                chunk_count,
                path.display()
            );
            Ok(IngestOutcome {
                asset_id,
                chunk_count,
                status: AssetStatus::Indexed,
            })
        }
        Err(e) => {
            warn!("ingestion failed for {}: {}", path.display(), e);
            // Leave no partial partition behind the failed asset.
            index.delete_asset(&asset_id).await?;
            registry.mark_failed(&asset_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

/// Chunk, embed, and store the document under `asset_id`. Returns the
/// chunk count; the caller owns the status transition.
async fn index_document(
    config: &Config,
    index: &VectorIndex,
    embedder: &dyn Embedder,
    asset_id: &str,
    doc: &loader::LoadedDocument,
) -> Result<i64> {
    let pieces = chunk_text(&doc.text, &config.chunking);
    if pieces.is_empty() {
        // Nothing extractable; the asset indexes with zero chunks and
        // retrieval returns an empty context set.
        return Ok(0);
    }

    let chunks: Vec<Chunk> = pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| Chunk {
            id: format!("{}_{}", asset_id, i),
            asset_id: asset_id.to_string(),
            chunk_index: i as i64,
            text: piece.text.clone(),
            start_offset: piece.start_offset as i64,
            end_offset: piece.end_offset as i64,
            page: doc.metadata.page_for_offset(piece.start_offset),
        })
        .collect();

    // Embed batch by batch; any batch failure aborts the whole ingestion
    // (no partial results surface past this point).
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let batch_vectors = embedder.embed(&texts).await?;
        if batch_vectors.len() != texts.len() {
            return Err(ServiceError::EmbeddingService(format!(
                "provider returned {} vectors for {} texts",
                batch_vectors.len(),
                texts.len()
            )));
        }
        vectors.extend(batch_vectors);
    }

    // Single transaction: a concurrent reader of this partition sees all
    // of the batch or none of it.
    index.upsert(&chunks, &vectors).await?;

    Ok(chunks.len() as i64)
}
