//! Parley API crate - axum HTTP server, the ask endpoint and answer streaming.
//!
//! Exposes the conversation pipeline over HTTP: `POST /` streams an answer
//! as plain text or server-sent events, `GET /sessions/{id}/history` shows a
//! session's turns and `GET /health` reports readiness.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod responder;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use responder::StreamingResponder;
pub use routes::{create_router, start_server};
pub use state::AppState;
