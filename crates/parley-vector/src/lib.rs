//! Parley vector crate - embedding services, vector index, retrieval, and
//! corpus ingestion.
//!
//! The index is built once at startup from the ingested corpus and is
//! read-only afterwards; queries embed the question and rank every stored
//! fragment by cosine similarity.

pub mod corpus;
pub mod embedding;
pub mod index;
pub mod pipeline;
pub mod search;

pub use corpus::{CorpusLoader, TextSplitter};
pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OpenAiEmbedding};
pub use index::{cosine_similarity, EmbeddedFragment, IndexBuilder, SearchHit, VectorIndex};
pub use pipeline::{IngestPipeline, IngestReport};
pub use search::{Retriever, DEFAULT_TOP_K};
