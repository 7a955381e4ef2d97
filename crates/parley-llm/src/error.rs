use thiserror::Error;

use parley_core::error::ParleyError;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors raised while talking to a language model.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider returned an error response.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Network/connectivity failure (retryable).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded (retryable with backoff).
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Authentication failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Missing or invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The stream ended or broke before the provider signalled completion.
    #[error("Stream error: {0}")]
    Stream(String),
}

impl LlmError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimit(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LlmError::Serialization(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

impl From<LlmError> for ParleyError {
    fn from(err: LlmError) -> Self {
        ParleyError::Generation(err.to_string())
    }
}
