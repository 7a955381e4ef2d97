//! Conversational retrieval pipeline for Parley.
//!
//! Rephrases follow-up questions against the session history, retrieves
//! grounding fragments, streams a generated answer, and commits each
//! completed exchange to an append-only per-session history.

pub mod context;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod prompts;
pub mod rephraser;

pub use context::ContextAssembler;
pub use error::ChatError;
pub use history::{ExchangeGuard, HistoryStore, InMemoryHistoryStore, SessionHistory};
pub use orchestrator::{AnswerStream, ConversationOrchestrator, ExchangeState, OrchestratorConfig};
pub use rephraser::QuestionRephraser;
