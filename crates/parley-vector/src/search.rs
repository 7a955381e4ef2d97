//! Retriever combining query embedding with vector search.
//!
//! Retriever orchestrates the EmbeddingService (to embed queries) and the
//! frozen VectorIndex (to find nearest neighbors).

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use parley_core::error::ParleyError;
use parley_core::types::Fragment;

use crate::embedding::DynEmbeddingService;
use crate::index::{SearchHit, VectorIndex};

/// Number of fragments returned when the caller does not ask for a specific k.
pub const DEFAULT_TOP_K: usize = 4;

/// Query-side wrapper around the vector index.
///
/// Uses dynamic dispatch (`Arc<dyn DynEmbeddingService>`) so that production
/// code can supply `OpenAiEmbedding` while tests use `MockEmbedding`. The
/// same embedder must have been used to build the index.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            index,
            embedder,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Override the default number of fragments returned by [`Retriever::retrieve`].
    ///
    /// A value of zero is treated as one.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The index this retriever searches.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Retrieve the configured number of fragments for `query`.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Fragment>, ParleyError> {
        self.search(query, self.top_k).await
    }

    /// Embed `query` and return the `k` most similar fragments, best first.
    ///
    /// Embedding failures surface as [`ParleyError::Embedding`] and are not retried.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Fragment>, ParleyError> {
        Ok(self
            .search_scored(query, k)
            .await?
            .into_iter()
            .map(|hit| hit.fragment)
            .collect())
    }

    /// Same as [`Retriever::search`] but keeps the similarity scores.
    pub async fn search_scored(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, ParleyError> {
        let start = Instant::now();
        let query_vec = self.embedder.embed_boxed(query).await?;
        let hits = self.index.search(&query_vec, k)?;

        debug!(
            k,
            fragments = hits.len(),
            top_score = hits.first().map(|h| h.score),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );
        Ok(hits)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("fragments", &self.index.len())
            .field("top_k", &self.top_k)
            .finish()
    }
}
