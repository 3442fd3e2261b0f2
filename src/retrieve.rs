//! Status-gated top-k retrieval.
//!
//! Resolves the asset, refuses anything that is not `Indexed`, embeds the
//! query, and searches the asset's partition. The gate makes index-level
//! locking unnecessary: a Pending asset is simply not queryable yet.

use log::debug;
use std::sync::Arc;

use crate::embedding::{embed_query, Embedder};
use crate::error::{Result, ServiceError};
use crate::index::VectorIndex;
use crate::models::{ChatThread, RetrievedChunk};
use crate::registry::AssetRegistry;

#[derive(Clone)]
pub struct Retriever {
    registry: AssetRegistry,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    /// Number of chunks fetched per query (config `retrieval.k`, default 4).
    k: usize,
}

impl Retriever {
    pub fn new(
        registry: AssetRegistry,
        index: VectorIndex,
        embedder: Arc<dyn Embedder>,
        k: usize,
    ) -> Self {
        Self {
            registry,
            index,
            embedder,
            k,
        }
    }

    /// Direct query path: unknown asset → `AssetNotFound`, non-Indexed →
    /// `AssetNotReady`.
    pub async fn retrieve(&self, asset_id: &str, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.registry.get_indexed(asset_id).await?;

        let query_vector = embed_query(self.embedder.as_ref(), query).await?;
        let results = self.index.search(asset_id, &query_vector, self.k).await?;
        debug!(
            "retrieved {} chunks for asset {} (k={})",
            results.len(),
            asset_id,
            self.k
        );
        Ok(results)
    }

    /// Thread query path. The thread holds only a weak reference to its
    /// asset, so an asset deleted (or failed) after the thread was created
    /// surfaces as `AssetNotReady` rather than `AssetNotFound`.
    pub async fn retrieve_for_thread(
        &self,
        thread: &ChatThread,
        query: &str,
    ) -> Result<Vec<RetrievedChunk>> {
        match self.retrieve(&thread.asset_id, query).await {
            Err(ServiceError::AssetNotFound(id)) => Err(ServiceError::AssetNotReady(id)),
            other => other,
        }
    }
}
