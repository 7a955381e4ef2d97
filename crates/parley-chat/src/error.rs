//! Error types for the conversation pipeline.

use parley_core::error::ParleyError;
use parley_llm::LlmError;

/// Errors from the conversation pipeline.
///
/// Every stage failure aborts the exchange; none of them leaves turns in the
/// session history.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("question cannot be empty")]
    EmptyQuestion,
    #[error("session id cannot be empty")]
    EmptySessionId,
    #[error("question exceeds maximum length of {0} characters")]
    QuestionTooLong(usize),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("retrieval error: {0}")]
    Retrieval(String),
    #[error("generation error: {0}")]
    Generation(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("{0} timed out after {1}s")]
    Timeout(&'static str, u64),
    #[error("exchange cancelled: caller disconnected")]
    Cancelled,
}

impl ChatError {
    /// True for errors caused by the request itself rather than a collaborator.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyQuestion | Self::EmptySessionId | Self::QuestionTooLong(_)
        )
    }
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::Embedding(msg) => ChatError::Embedding(msg),
            ParleyError::Generation(msg) => ChatError::Generation(msg),
            ParleyError::Session(msg) => ChatError::Session(msg),
            other => ChatError::Retrieval(other.to_string()),
        }
    }
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        ChatError::Generation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyQuestion.to_string(), "question cannot be empty");
        assert_eq!(ChatError::EmptySessionId.to_string(), "session id cannot be empty");
        assert_eq!(
            ChatError::QuestionTooLong(4000).to_string(),
            "question exceeds maximum length of 4000 characters"
        );
        assert_eq!(
            ChatError::Timeout("rephrase", 60).to_string(),
            "rephrase timed out after 60s"
        );
        assert_eq!(
            ChatError::Generation("model overloaded".into()).to_string(),
            "generation error: model overloaded"
        );
    }

    #[test]
    fn test_from_parley_error_keeps_stage() {
        let err: ChatError = ParleyError::Embedding("no vector".into()).into();
        assert!(matches!(err, ChatError::Embedding(ref m) if m == "no vector"));

        let err: ChatError = ParleyError::Retrieval("dimension".into()).into();
        assert!(matches!(err, ChatError::Retrieval(_)));

        let err: ChatError = ParleyError::Io(std::io::Error::other("disk")).into();
        assert!(matches!(err, ChatError::Retrieval(_)));
    }

    #[test]
    fn test_from_llm_error() {
        let err: ChatError = LlmError::Stream("cut".into()).into();
        assert!(matches!(err, ChatError::Generation(ref m) if m.contains("cut")));
    }

    #[test]
    fn test_validation_classification() {
        assert!(ChatError::EmptyQuestion.is_validation());
        assert!(ChatError::QuestionTooLong(1).is_validation());
        assert!(!ChatError::Cancelled.is_validation());
        assert!(!ChatError::Retrieval("x".into()).is_validation());
    }
}
