//! Streaming of answer tokens to the HTTP caller.
//!
//! An [`AnswerStream`] becomes either a chunked `text/plain` body or a
//! server-sent event stream. In both modes tokens are forwarded as they are
//! generated, and a failure after the first byte is never presented as a
//! successful end of stream:
//!
//! - plain text: the body errors, so the connection is aborted instead of
//!   terminating the chunked encoding cleanly.
//! - event stream: an `error` event is sent and no `done` event follows.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{stream, Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::warn;

use parley_chat::AnswerStream;

/// Header carrying the exchange id of a streamed answer.
pub const EXCHANGE_ID_HEADER: &str = "x-exchange-id";

const EVENT_STREAM: &str = "text/event-stream";

/// Payload of a `token` event.
#[derive(Debug, Serialize)]
struct TokenEvent {
    content: String,
}

/// Payload of the final `done` event.
#[derive(Debug, Serialize)]
struct DoneEvent {
    exchange_id: String,
}

/// Payload of an `error` event.
#[derive(Debug, Serialize)]
struct ErrorEvent {
    message: String,
}

/// Output framing chosen from the request's `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingResponder {
    PlainText,
    EventStream,
}

impl StreamingResponder {
    /// Event-stream framing when the client accepts `text/event-stream`,
    /// plain text otherwise.
    pub fn negotiate(headers: &HeaderMap) -> Self {
        let wants_events = headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.contains(EVENT_STREAM));
        if wants_events {
            Self::EventStream
        } else {
            Self::PlainText
        }
    }

    /// Turn the answer into a streaming response. Tokens are written in the
    /// order they were generated.
    pub fn respond(self, answer: AnswerStream) -> Response {
        let exchange_id = answer.exchange_id().to_string();
        let mut response = match self {
            Self::PlainText => plain_text(answer),
            Self::EventStream => Sse::new(events(answer))
                .keep_alive(KeepAlive::default())
                .into_response(),
        };
        if let Ok(value) = HeaderValue::from_str(&exchange_id) {
            response.headers_mut().insert(EXCHANGE_ID_HEADER, value);
        }
        response
    }
}

fn plain_text(answer: AnswerStream) -> Response {
    let exchange_id = answer.exchange_id();
    let body = answer.inspect_err(move |err| {
        warn!(exchange_id = %exchange_id, error = %err, "Aborting answer stream");
    });
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}

/// `token` events in order, then exactly one `done` or `error` event.
fn events(answer: AnswerStream) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    let exchange_id = answer.exchange_id();
    stream::unfold(Some(answer), move |state| async move {
        let mut answer = state?;
        let event = match answer.next().await {
            Some(Ok(token)) => {
                let event = json_event("token", &TokenEvent { content: token });
                return Some((Ok(event), Some(answer)));
            }
            Some(Err(err)) => {
                warn!(exchange_id = %exchange_id, error = %err, "Answer failed mid-stream");
                json_event(
                    "error",
                    &ErrorEvent {
                        message: err.to_string(),
                    },
                )
            }
            None => json_event(
                "done",
                &DoneEvent {
                    exchange_id: exchange_id.to_string(),
                },
            ),
        };
        Some((Ok(event), None))
    })
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|_| Event::default().event(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_defaults_to_plain_text() {
        assert_eq!(
            StreamingResponder::negotiate(&HeaderMap::new()),
            StreamingResponder::PlainText
        );

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain, */*"));
        assert_eq!(
            StreamingResponder::negotiate(&headers),
            StreamingResponder::PlainText
        );
    }

    #[test]
    fn test_negotiate_event_stream() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        assert_eq!(
            StreamingResponder::negotiate(&headers),
            StreamingResponder::EventStream
        );
    }
}
