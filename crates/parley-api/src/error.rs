//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same JSON error shape and maps pipeline
//! failures to HTTP status codes. Errors that happen after an answer has
//! started streaming never reach this type; the responder reports those
//! in-band.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use parley_chat::ChatError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "upstream_error").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - malformed body or invalid question/session id.
    BadRequest(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 502 Bad Gateway - the embedding service or language model failed.
    Upstream(String),
    /// 504 Gateway Timeout - a pipeline stage exceeded its time budget.
    Timeout(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        if err.is_validation() {
            return ApiError::BadRequest(err.to_string());
        }
        match err {
            ChatError::Embedding(_) | ChatError::Retrieval(_) | ChatError::Generation(_) => {
                ApiError::Upstream(err.to_string())
            }
            ChatError::Timeout(..) => ApiError::Timeout(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_bad_request() {
        for err in [
            ChatError::EmptyQuestion,
            ChatError::EmptySessionId,
            ChatError::QuestionTooLong(10),
        ] {
            assert!(matches!(ApiError::from(err), ApiError::BadRequest(_)));
        }
    }

    #[test]
    fn test_collaborator_failures_are_upstream() {
        let err = ApiError::from(ChatError::Generation("model unavailable".to_string()));
        match err {
            ApiError::Upstream(msg) => assert!(msg.contains("model unavailable")),
            other => panic!("Expected Upstream, got {:?}", other),
        }
        assert!(matches!(
            ApiError::from(ChatError::Embedding("x".to_string())),
            ApiError::Upstream(_)
        ));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::BadRequest("b".into()), StatusCode::BAD_REQUEST),
            (ApiError::Internal("i".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::Upstream("u".into()), StatusCode::BAD_GATEWAY),
            (
                ApiError::from(ChatError::Timeout("retrieval", 30)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ApiError::from(ChatError::Session("poisoned".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
