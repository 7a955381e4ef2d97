//! In-memory vector index with brute-force cosine similarity search.
//!
//! The index is assembled through [`IndexBuilder`] during startup and then
//! frozen into a [`VectorIndex`]. A frozen index has no mutation API, so it
//! can be shared behind an `Arc` and searched concurrently without locks.
//! Search is O(n) over the corpus, which is fine for a single document set.


use parley_core::error::ParleyError;
use parley_core::types::Fragment;

/// A fragment together with its embedding vector.
#[derive(Debug, Clone)]
pub struct EmbeddedFragment {
    pub fragment: Fragment,
    pub vector: Vec<f32>,
}

/// A single hit returned from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matching fragment.
    pub fragment: Fragment,
    /// Cosine similarity to the query (-1.0 to 1.0).
    pub score: f64,
    /// Position of the fragment in ingestion order.
    pub position: usize,
}

// =============================================================================
// IndexBuilder
// =============================================================================

/// Collects embedded fragments before the index is frozen.
///
/// Enforces that every vector shares the dimension of the first one inserted.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    entries: Vec<EmbeddedFragment>,
    dimension: Option<usize>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment with its vector.
    ///
    /// Fails with [`ParleyError::Embedding`] if the vector is empty or its
    /// dimension differs from the vectors already stored.
    pub fn insert(&mut self, fragment: Fragment, vector: Vec<f32>) -> Result<(), ParleyError> {
        if vector.is_empty() {
            return Err(ParleyError::Embedding(
                "Refusing to index an empty vector".to_string(),
            ));
        }
        match self.dimension {
            Some(dim) if dim != vector.len() => {
                return Err(ParleyError::Embedding(format!(
                    "Vector dimension {} does not match index dimension {}",
                    vector.len(),
                    dim
                )));
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }
        self.entries.push(EmbeddedFragment { fragment, vector });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the collected entries into a read-only index.
    pub fn build(self) -> VectorIndex {
        VectorIndex {
            entries: self.entries,
            dimension: self.dimension,
        }
    }
}

// =============================================================================
// VectorIndex
// =============================================================================

/// Read-only vector index over the ingested corpus.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<EmbeddedFragment>,
    dimension: Option<usize>,
}

impl VectorIndex {
    /// An index with no fragments. Every search on it returns no hits.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Search for the k nearest fragments to the query vector by cosine similarity.
    ///
    /// Returns at most `k` hits sorted by descending score. Equal scores keep
    /// ingestion order. Fails with [`ParleyError::Retrieval`] if the query
    /// dimension does not match the index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, ParleyError> {
        if let Some(dim) = self.dimension {
            if query.len() != dim {
                return Err(ParleyError::Retrieval(format!(
                    "Query dimension {} does not match index dimension {}",
                    query.len(),
                    dim
                )));
            }
        }

        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let score = cosine_similarity(query, &entry.vector);
                // Non-finite components give NaN; rank those last.
                let score = if score.is_nan() { f64::NEG_INFINITY } else { score };
                (position, score)
            })
            .collect();

        // sort_by is stable, so ties stay in ingestion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| SearchHit {
                fragment: self.entries[position].fragment.clone(),
                score,
                position,
            })
            .collect())
    }

    /// Shared dimension of every stored vector, or `None` for an empty index.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Return the number of fragments stored in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return true if the index contains no fragments.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
