//! Scripted generator for tests.
//!
//! `MockGenerator` returns queued replies in order, falling back to an
//! optional responder closure once the queue is empty. Streamed replies are
//! split into word-sized tokens. Every request is recorded so tests can
//! assert on the prompts the pipeline built.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{LlmError, Result};
use crate::generator::{Generator, TokenStream};
use crate::types::GenerationRequest;

/// One scripted outcome of a generator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Succeed with this text.
    Text(String),
    /// Stream the first `tokens` tokens of `text`, then fail. A non-streamed
    /// call fails outright.
    FailAfter { text: String, tokens: usize },
    /// Fail before producing anything.
    Error(String),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn fail_after(text: impl Into<String>, tokens: usize) -> Self {
        Self::FailAfter {
            text: text.into(),
            tokens,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

type Responder = Box<dyn Fn(&GenerationRequest) -> MockReply + Send + Sync>;

/// Deterministic [`Generator`] for tests.
pub struct MockGenerator {
    replies: Mutex<VecDeque<MockReply>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<GenerationRequest>>,
    token_delay: Option<Duration>,
    tokens_emitted: Arc<AtomicUsize>,
}

impl MockGenerator {
    /// Reply with `replies` in order, then fail.
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            responder: None,
            requests: Mutex::new(Vec::new()),
            token_delay: None,
            tokens_emitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reply with the given texts in order.
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(MockReply::text).collect())
    }

    /// Compute every reply from the request.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> MockReply + Send + Sync + 'static,
    {
        let mut generator = Self::new(Vec::new());
        generator.responder = Some(Box::new(responder));
        generator
    }

    /// Sleep before each streamed token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Number of streamed tokens actually handed to a consumer.
    pub fn tokens_emitted(&self) -> usize {
        self.tokens_emitted.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &GenerationRequest) -> MockReply {
        lock(&self.requests).push(request.clone());
        if let Some(reply) = lock(&self.replies).pop_front() {
            return reply;
        }
        match self.responder {
            Some(ref responder) => responder(request),
            None => MockReply::error("MockGenerator: no more replies available"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Split text into word tokens that concatenate back to the original.
fn tokenize(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(String::from).collect()
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        match self.next_reply(&request) {
            MockReply::Text(text) => Ok(text),
            MockReply::FailAfter { .. } => Err(LlmError::Backend("MockGenerator: scripted failure".into())),
            MockReply::Error(message) => Err(LlmError::Backend(message)),
        }
    }

    async fn generate_stream(&self, request: GenerationRequest) -> Result<TokenStream> {
        let (tokens, fail_after) = match self.next_reply(&request) {
            MockReply::Text(text) => (tokenize(&text), None),
            MockReply::FailAfter { text, tokens } => (tokenize(&text), Some(tokens)),
            MockReply::Error(message) => return Err(LlmError::Backend(message)),
        };

        let delay = self.token_delay;
        let emitted = self.tokens_emitted.clone();
        let items: VecDeque<String> = match fail_after {
            Some(n) => tokens.into_iter().take(n).collect(),
            None => tokens.into(),
        };

        Ok(Box::pin(futures::stream::unfold(
            (items, fail_after.is_some(), false),
            move |(mut items, fail, finished)| {
                let emitted = emitted.clone();
                async move {
                    if finished {
                        return None;
                    }
                    if let Some(d) = delay {
                        tokio::time::sleep(d).await;
                    }
                    match items.pop_front() {
                        Some(token) => {
                            emitted.fetch_add(1, Ordering::SeqCst);
                            Some((Ok(token), (items, fail, false)))
                        }
                        None if fail => Some((
                            Err(LlmError::Stream("MockGenerator: stream interrupted".into())),
                            (items, fail, true),
                        )),
                        None => None,
                    }
                }
            },
        )))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use futures::StreamExt;

    fn request(text: &str) -> GenerationRequest {
        GenerationRequest::new(vec![ChatMessage::user(text)])
    }

    #[tokio::test]
    async fn test_replies_in_order_then_error() {
        let generator = MockGenerator::with_texts(["one", "two"]);
        assert_eq!(generator.generate(request("a")).await.unwrap(), "one");
        assert_eq!(generator.generate(request("b")).await.unwrap(), "two");
        assert!(generator.generate(request("c")).await.is_err());
        assert_eq!(generator.request_count(), 3);
    }

    #[tokio::test]
    async fn test_stream_concatenates_to_reply() {
        let generator = MockGenerator::with_texts(["Linear algebra and programming."]);
        let tokens: Vec<String> = generator
            .generate_stream(request("q"))
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens.concat(), "Linear algebra and programming.");
        assert_eq!(generator.tokens_emitted(), 4);
    }

    #[tokio::test]
    async fn test_fail_after_streams_partial_then_errors() {
        let generator = MockGenerator::new(vec![MockReply::fail_after("a b c d", 2)]);
        let items: Vec<Result<String>> = generator
            .generate_stream(request("q"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "a ");
        assert_eq!(items[1].as_ref().unwrap(), "b ");
        assert!(matches!(items[2], Err(LlmError::Stream(_))));
    }

    #[tokio::test]
    async fn test_error_reply_fails_before_stream() {
        let generator = MockGenerator::new(vec![MockReply::error("unavailable")]);
        assert!(generator.generate_stream(request("q")).await.is_err());
    }

    #[tokio::test]
    async fn test_from_fn_sees_request() {
        let generator = MockGenerator::from_fn(|req| {
            MockReply::text(format!("echo: {}", req.last_user_message().unwrap_or("")))
        });
        assert_eq!(generator.generate(request("hi")).await.unwrap(), "echo: hi");
        assert_eq!(generator.requests()[0].last_user_message(), Some("hi"));
    }

    #[tokio::test]
    async fn test_queue_takes_precedence_over_responder() {
        let mut generator = MockGenerator::from_fn(|_| MockReply::text("fallback"));
        generator.replies = Mutex::new(VecDeque::from(vec![MockReply::text("queued")]));
        assert_eq!(generator.generate(request("a")).await.unwrap(), "queued");
        assert_eq!(generator.generate(request("b")).await.unwrap(), "fallback");
    }

    #[test]
    fn test_tokenize_round_trips() {
        let text = "Prerequisites:  linear algebra ";
        assert_eq!(tokenize(text).concat(), text);
    }
}
