//! Parley application binary - composition root.
//!
//! Ties together all Parley crates into a single executable:
//! 1. Load configuration from TOML (CLI and env overrides applied)
//! 2. Load and chunk the corpus
//! 3. Embed every fragment into an immutable vector index
//! 4. Build the retriever, generator, history store and orchestrator
//! 5. Start the axum API server

mod cli;

use std::sync::Arc;

use clap::Parser;

use parley_api::{start_server, AppState};
use parley_chat::{ConversationOrchestrator, HistoryStore, InMemoryHistoryStore, OrchestratorConfig};
use parley_core::config::{EmbeddingConfig, ParleyConfig};
use parley_core::error::ParleyError;
use parley_llm::OpenAiGenerator;
use parley_vector::{
    CorpusLoader, DynEmbeddingService, IngestPipeline, MockEmbedding, OpenAiEmbedding, Retriever,
};

use cli::CliArgs;

/// Pick the embedding backend named by `embedding.provider`.
fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingService>, ParleyError> {
    let embedder: Arc<dyn DynEmbeddingService> = match config.provider.as_str() {
        "mock" => {
            tracing::warn!("Using mock embeddings; retrieval quality is not meaningful");
            Arc::new(MockEmbedding::new())
        }
        _ => {
            if std::env::var(&config.api_key_env).is_err() {
                tracing::warn!(var = %config.api_key_env, "Embedding API key not set");
            }
            Arc::new(OpenAiEmbedding::from_config(config)?)
        }
    };
    Ok(embedder)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine.
    let dotenv = dotenvy::dotenv().ok();

    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    config.general.port = args.resolve_port(config.general.port);

    // Tracing.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }
    tracing::info!(path = %config_file.display(), "Configuration loaded");
    config.validate()?;

    // Corpus.
    let corpus_path = args.resolve_corpus(&config.corpus.path);
    let loader = CorpusLoader::from_config(&config.corpus)?;
    let fragments = loader.load(&corpus_path)?;
    tracing::info!(
        path = %corpus_path.display(),
        fragments = fragments.len(),
        "Corpus loaded"
    );

    // Vector index, frozen before the server accepts requests.
    let embedder = build_embedder(&config.embedding)?;
    let mut pipeline = IngestPipeline::new(Arc::clone(&embedder));
    let report = pipeline.add(fragments).await?;
    let index = Arc::new(pipeline.finish());
    tracing::info!(
        stored = report.stored,
        skipped = report.skipped,
        dimension = ?index.dimension(),
        "Vector index built"
    );
    if index.is_empty() {
        tracing::warn!("Vector index is empty; answers will have no grounding context");
    }

    let retriever = Retriever::new(index, embedder).with_top_k(config.retrieval.top_k);

    // Generation and conversation state.
    let generator = Arc::new(OpenAiGenerator::from_config(&config.llm)?);
    tracing::info!(model = %config.llm.model, "Generator ready");

    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::from_config(&config.sessions));
    let orchestrator = ConversationOrchestrator::new(
        store,
        retriever,
        generator,
        OrchestratorConfig::from(&config.chat),
    );

    // === API server ===

    let state = AppState::new(config.clone(), orchestrator);
    if let Err(e) = start_server(&config, state).await {
        tracing::error!(error = %e, "API server stopped");
        tracing::error!(
            "Is another instance running? Try: PARLEY_PORT={} cargo run -p parley-app",
            config.general.port.saturating_add(1)
        );
        return Err(e.into());
    }

    Ok(())
}
