use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Enums
// =============================================================================

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person asking questions.
    Human,
    /// The assistant answering them.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Human => write!(f, "human"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

// =============================================================================
// Corpus types
// =============================================================================

/// A chunk of source text small enough to embed and retrieve individually.
///
/// Created once during ingestion and never modified afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// The fragment text.
    pub text: String,
    /// Where the text came from (file path, chunk number, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Fragment {
    /// Create a fragment without metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Conversation types
// =============================================================================

/// One message of a conversation. Immutable once appended to a history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// A turn spoken by the user.
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    /// A turn spoken by the assistant.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// The sole external input of the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    #[serde(alias = "session_id")]
    pub session_id: String,
    pub question: String,
}

impl PipelineRequest {
    pub fn new(session_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            question: question.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::Human).unwrap();
        assert_eq!(json, "\"human\"");

        let deserialized: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(deserialized, Role::Assistant);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Human.to_string(), "human");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_fragment_metadata_builder() {
        let fragment = Fragment::new("Prerequisites: linear algebra.")
            .with_metadata("source", "syllabus.txt")
            .with_metadata("chunk", 0);
        assert_eq!(fragment.metadata["source"], "syllabus.txt");
        assert_eq!(fragment.metadata["chunk"], 0);
    }

    #[test]
    fn test_fragment_deserializes_without_metadata() {
        let fragment: Fragment = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert_eq!(fragment.text, "hello");
        assert!(fragment.metadata.is_empty());
    }

    #[test]
    fn test_turn_constructors_set_role() {
        assert_eq!(ConversationTurn::human("q").role, Role::Human);
        assert_eq!(ConversationTurn::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn test_pipeline_request_accepts_camel_and_snake_case() {
        let camel: PipelineRequest =
            serde_json::from_str(r#"{"sessionId": "s1", "question": "why?"}"#).unwrap();
        let snake: PipelineRequest =
            serde_json::from_str(r#"{"session_id": "s1", "question": "why?"}"#).unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.session_id, "s1");
    }
}
