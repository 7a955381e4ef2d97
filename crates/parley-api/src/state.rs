//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use parley_chat::ConversationOrchestrator;
use parley_core::config::ParleyConfig;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. The
/// configuration is read-only once the server starts.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<ParleyConfig>,
    /// The conversation pipeline, including its history store and retriever.
    pub orchestrator: Arc<ConversationOrchestrator>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ParleyConfig, orchestrator: ConversationOrchestrator) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            start_time: Instant::now(),
        }
    }
}
