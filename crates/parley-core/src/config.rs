use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the parley server.
///
/// Loaded from `~/.parley/config.toml` by default. Each section corresponds
/// to one stage of the pipeline or a cross-cutting concern; every section
/// falls back to its defaults when absent from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(ParleyError::Config(
                "retrieval.top_k must be positive".to_string(),
            ));
        }
        if self.corpus.chunk_size == 0 {
            return Err(ParleyError::Config(
                "corpus.chunk_size must be positive".to_string(),
            ));
        }
        if self.corpus.chunk_overlap >= self.corpus.chunk_size {
            return Err(ParleyError::Config(format!(
                "corpus.chunk_overlap ({}) must be smaller than corpus.chunk_size ({})",
                self.corpus.chunk_overlap, self.corpus.chunk_size
            )));
        }
        if !["openai", "mock"].contains(&self.embedding.provider.as_str()) {
            return Err(ParleyError::Config(format!(
                "embedding.provider must be 'openai' or 'mock', got '{}'",
                self.embedding.provider
            )));
        }
        if self.chat.stage_timeout_secs == 0 {
            return Err(ParleyError::Config(
                "chat.stage_timeout_secs must be positive".to_string(),
            ));
        }
        if self.sessions.max_sessions == Some(0) {
            return Err(ParleyError::Config(
                "sessions.max_sessions must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// General server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Interface the HTTP server binds to.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_level: "info".to_string(),
        }
    }
}

/// Document corpus ingested at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// File or directory holding `.txt`, `.md` or `.jsonl` documents.
    pub path: String,
    /// Maximum fragment length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive fragments.
    pub chunk_overlap: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: "./files".to_string(),
            chunk_size: 1536,
            chunk_overlap: 128,
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of fragments handed to the generator per question.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "openai" for any OpenAI-compatible endpoint, "mock" for offline hashing.
    pub provider: String,
    /// Base URL of the embeddings API.
    pub base_url: String,
    /// Embedding model name.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat completions API.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Upper bound on generated tokens per call.
    pub max_output_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient failures of non-streamed calls.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_output_tokens: 2048,
            temperature: 0.2,
            timeout_secs: 300,
            max_retries: 3,
        }
    }
}

/// Conversation pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum question length in characters.
    pub max_question_length: usize,
    /// Bound on each rephrase call, embedding call and wait for the next token.
    pub stage_timeout_secs: u64,
    /// Run exchanges on the same session one at a time.
    pub serialize_sessions: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_question_length: 4000,
            stage_timeout_secs: 60,
            serialize_sessions: true,
        }
    }
}

/// Session history retention. Both limits are off by default, which keeps
/// every session for the lifetime of the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Evict the least recently used session beyond this many sessions.
    pub max_sessions: Option<usize>,
    /// Drop sessions idle for longer than this many minutes.
    pub idle_ttl_minutes: Option<u64>,
}

/// HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Requests per second accepted by the ask endpoint.
    pub rate_limit_per_sec: u64,
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 50,
            max_body_bytes: 64 * 1024,
        }
    }
}
