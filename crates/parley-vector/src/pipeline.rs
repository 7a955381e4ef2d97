//! Startup ingestion pipeline.
//!
//! `IngestPipeline` takes the ordered fragments produced by the corpus loader,
//! embeds each one, and collects them into an [`IndexBuilder`]. Once the
//! corpus is exhausted, `finish` freezes the result into the read-only
//! [`VectorIndex`] used while serving requests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use parley_core::error::ParleyError;
use parley_core::types::Fragment;

use crate::embedding::DynEmbeddingService;
use crate::index::{IndexBuilder, VectorIndex};

/// Outcome of one `add` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Fragments embedded and stored.
    pub stored: usize,
    /// Fragments skipped because their text was blank.
    pub skipped: usize,
}

/// Builds the vector index from the corpus.
///
/// Processes each fragment through:
/// 1. Text validation (blank fragments are skipped)
/// 2. Embedding generation
/// 3. Index insertion (dimension check)
pub struct IngestPipeline {
    builder: IndexBuilder,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl IngestPipeline {
    pub fn new(embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            builder: IndexBuilder::new(),
            embedder,
        }
    }

    /// Embed and store fragments in the order given.
    ///
    /// An embedding failure aborts the call with [`ParleyError::Embedding`];
    /// fragments stored before the failure remain in the builder.
    pub async fn add(&mut self, fragments: Vec<Fragment>) -> Result<IngestReport, ParleyError> {
        let mut report = IngestReport::default();

        for fragment in fragments {
            if fragment.text.trim().is_empty() {
                debug!("Skipping fragment with blank text");
                report.skipped += 1;
                continue;
            }

            let vector = self.embedder.embed_boxed(&fragment.text).await?;
            self.builder.insert(fragment, vector)?;
            report.stored += 1;
        }

        debug!(
            stored = report.stored,
            skipped = report.skipped,
            total = self.builder.len(),
            "Fragments ingested"
        );
        Ok(report)
    }

    /// Number of fragments stored so far.
    pub fn len(&self) -> usize {
        self.builder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// Freeze the collected fragments into the serving index.
    pub fn finish(self) -> VectorIndex {
        let index = self.builder.build();
        info!(
            fragments = index.len(),
            dimension = ?index.dimension(),
            "Vector index built"
        );
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingService, MockEmbedding};

    fn make_pipeline() -> IngestPipeline {
        IngestPipeline::new(Arc::new(MockEmbedding::with_dimensions(32)))
    }

    /// Embedder that fails on any text containing "boom".
    struct FailingEmbedding;

    impl EmbeddingService for FailingEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
            if text.contains("boom") {
                Err(ParleyError::Embedding("upstream unavailable".to_string()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        fn dimensions(&self) -> Option<usize> {
            Some(2)
        }
    }

    #[tokio::test]
    async fn test_add_stores_fragments_in_order() {
        let mut pipeline = make_pipeline();
        let report = pipeline
            .add(vec![
                Fragment::new("Prerequisites: linear algebra and programming."),
                Fragment::new("Grading: homework 40%, final project 60%."),
            ])
            .await
            .unwrap();

        assert_eq!(report, IngestReport { stored: 2, skipped: 0 });
        let index = pipeline.finish();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dimension(), Some(32));
    }

    #[tokio::test]
    async fn test_add_skips_blank_fragments() {
        let mut pipeline = make_pipeline();
        let report = pipeline
            .add(vec![Fragment::new("   "), Fragment::new("real content")])
            .await
            .unwrap();
        assert_eq!(report.stored, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(pipeline.len(), 1);
    }

    #[tokio::test]
    async fn test_add_accumulates_across_calls() {
        let mut pipeline = make_pipeline();
        pipeline.add(vec![Fragment::new("one")]).await.unwrap();
        pipeline.add(vec![Fragment::new("two")]).await.unwrap();
        assert_eq!(pipeline.finish().len(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let mut pipeline = IngestPipeline::new(Arc::new(FailingEmbedding));
        let err = pipeline
            .add(vec![Fragment::new("fine"), Fragment::new("boom")])
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Embedding(_)));
        assert_eq!(pipeline.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_corpus_builds_empty_index() {
        let pipeline = make_pipeline();
        assert!(pipeline.is_empty());
        let index = pipeline.finish();
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
    }
}
