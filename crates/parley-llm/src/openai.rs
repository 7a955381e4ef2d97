//! OpenAI-compatible chat completion client.
//!
//! `OpenAiGenerator` talks to `POST {base_url}/chat/completions` on OpenAI or
//! any compatible service (Groq, Ollama, vLLM, ...). Streaming uses the
//! server-sent events format terminated by `data: [DONE]`.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};

use parley_core::config::LlmConfig;

use crate::error::{LlmError, Result};
use crate::generator::{with_retry, Generator, TokenStream};
use crate::types::{ChatMessage, GenerationRequest};

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for an OpenAI-compatible service.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key (optional for local services like Ollama).
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Default output token cap, unless the request sets one.
    pub max_tokens: u32,
    /// Default sampling temperature, unless the request sets one.
    pub temperature: f32,
    /// Whole-request timeout, including reading a streamed body.
    pub timeout: Duration,
    /// Retries for transient errors on non-streamed calls.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl OpenAiConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE.to_string(),
            model: model.into(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Build from the `[llm]` config section, reading the key from the
    /// environment variable it names. A missing key is allowed for local
    /// services.
    pub fn from_config(config: &LlmConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());
        Self {
            api_key,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_output_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Generator backed by an OpenAI-compatible chat completion endpoint.
pub struct OpenAiGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("has_api_key", &self.config.api_key.is_some())
            .finish()
    }
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(OpenAiConfig::from_config(config))
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");
        match self.config.api_key {
            Some(ref api_key) => builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key)),
            None => builder,
        }
    }

    fn to_wire(&self, request: &GenerationRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: self.config.model.clone(),
            messages: request.messages.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: request.temperature.unwrap_or(self.config.temperature),
            stream,
        }
    }

    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WireErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

        match status.as_u16() {
            401 | 403 => LlmError::Auth(message),
            429 => LlmError::RateLimit(message),
            500..=599 => LlmError::Network(format!("Server error: {}", message)),
            _ => LlmError::Backend(message),
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let body = self.to_wire(&request, false);
        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat completion request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || async {
                let response = self
                    .add_headers(self.client.post(self.completions_url()))
                    .json(&body)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(Self::handle_error_response(response).await);
                }

                let parsed: WireResponse = response.json().await?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| LlmError::Serialization("Response has no message content".into()))
            },
        )
        .await
    }

    async fn generate_stream(&self, request: GenerationRequest) -> Result<TokenStream> {
        let body = self.to_wire(&request, true);
        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            "Opening chat completion stream"
        );

        let response = self
            .add_headers(self.client.post(self.completions_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        Ok(parse_sse_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// =============================================================================
// SSE parsing
// =============================================================================

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    /// Raw bytes not yet terminated by a newline. Only complete lines are
    /// decoded, so a character split across network chunks stays intact.
    buffer: Vec<u8>,
    finished: bool,
    done: bool,
}

/// Turn a chat completion SSE body into a stream of text increments.
///
/// The stream ends cleanly on `data: [DONE]` or after a chunk carrying a
/// `finish_reason`. A body that ends before either is reported as an error so
/// a cut connection is never mistaken for a complete answer.
fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> TokenStream {
    Box::pin(futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: Vec::new(),
            finished: false,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                while let Some(line_end) = state.buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = state.buffer.drain(..=line_end).collect();
                    let line = match std::str::from_utf8(&raw) {
                        Ok(text) => text.trim().to_string(),
                        Err(e) => {
                            state.done = true;
                            return Some((
                                Err(LlmError::Stream(format!("Invalid UTF-8 in stream: {}", e))),
                                state,
                            ));
                        }
                    };

                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };

                    if data == "[DONE]" {
                        state.done = true;
                        return None;
                    }

                    if let Ok(error) = serde_json::from_str::<WireErrorResponse>(data) {
                        state.done = true;
                        return Some((Err(LlmError::Backend(error.error.message)), state));
                    }

                    let chunk = match serde_json::from_str::<WireStreamChunk>(data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            tracing::debug!(error = %e, "Skipping unparseable stream chunk");
                            continue;
                        }
                    };

                    if let Some(choice) = chunk.choices.into_iter().next() {
                        if choice.finish_reason.is_some() {
                            state.finished = true;
                        }
                        if let Some(content) = choice.delta.and_then(|d| d.content) {
                            if !content.is_empty() {
                                return Some((Ok(content), state));
                            }
                        }
                    }
                }

                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.extend_from_slice(&bytes);
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(LlmError::Network(e.to_string())), state));
                    }
                    None if state.finished => return None,
                    None => {
                        state.done = true;
                        return Some((
                            Err(LlmError::Stream(
                                "Stream ended before the model finished".to_string(),
                            )),
                            state,
                        ));
                    }
                }
            }
        },
    ))
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: Option<WireDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse_body(parts: &[&str]) -> TokenStream {
        let chunks: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        parse_sse_stream(futures::stream::iter(chunks))
    }

    fn delta(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}},\"finish_reason\":null}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    async fn collect(stream: TokenStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_sse_stream_yields_tokens_in_order() {
        let first = delta("Linear");
        let second = delta(" algebra");
        let items = collect(sse_body(&[&first, &second, "data: [DONE]\n\n"])).await;
        let tokens: Vec<String> = items.into_iter().map(|t| t.unwrap()).collect();
        assert_eq!(tokens, vec!["Linear", " algebra"]);
    }

    #[tokio::test]
    async fn test_sse_stream_handles_split_lines() {
        let line = delta("hello");
        let (head, tail) = line.split_at(10);
        let items = collect(sse_body(&[head, tail, "data: [DONE]\n"])).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_sse_stream_keeps_multibyte_char_split_across_chunks() {
        let line = delta("café");
        let bytes = line.as_bytes();
        // 'é' is two bytes; cut between them.
        let cut = line.find('é').unwrap() + 1;
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..cut])),
            Ok(Bytes::copy_from_slice(&bytes[cut..])),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ];
        let items = collect(parse_sse_stream(futures::stream::iter(chunks))).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "café");
    }

    #[tokio::test]
    async fn test_sse_stream_invalid_utf8_line_is_error() {
        let chunks: Vec<reqwest::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"data: \xff\xfe\n"))];
        let items = collect(parse_sse_stream(futures::stream::iter(chunks))).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LlmError::Stream(_))));
    }

    #[tokio::test]
    async fn test_sse_stream_ends_after_finish_reason() {
        let first = delta("done");
        let finish = "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n";
        let items = collect(sse_body(&[&first, finish])).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[tokio::test]
    async fn test_sse_stream_truncated_body_is_error() {
        let first = delta("partial");
        let items = collect(sse_body(&[&first])).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(LlmError::Stream(_))));
    }

    #[tokio::test]
    async fn test_sse_stream_error_payload() {
        let items = collect(sse_body(&[
            "data: {\"error\":{\"message\":\"model overloaded\"}}\n\n",
        ]))
        .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LlmError::Backend(ref m)) if m == "model overloaded"));
    }

    #[tokio::test]
    async fn test_sse_stream_skips_comments_and_empty_deltas() {
        let role_only = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n";
        let token = delta("x");
        let items = collect(sse_body(&[": keep-alive\n\n", role_only, &token, "data: [DONE]\n\n"])).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "x");
    }

    #[test]
    fn test_completions_url_trims_trailing_slash() {
        let generator =
            OpenAiGenerator::new(OpenAiConfig::new("gpt-4o-mini").with_base_url("http://localhost:11434/v1/"))
                .unwrap();
        assert_eq!(
            generator.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_wire_request_uses_defaults_unless_overridden() {
        let generator = OpenAiGenerator::new(OpenAiConfig::new("gpt-4o-mini")).unwrap();
        let request = GenerationRequest::new(vec![ChatMessage::user("hi")]);
        let wire = generator.to_wire(&request, true);
        assert_eq!(wire.max_tokens, 2048);
        assert!(wire.stream);

        let wire = generator.to_wire(&request.with_max_tokens(10).with_temperature(0.9), false);
        assert_eq!(wire.max_tokens, 10);
        assert!((wire.temperature - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_from_llm_section() {
        let section = LlmConfig {
            api_key_env: "PARLEY_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..LlmConfig::default()
        };
        let config = OpenAiConfig::from_config(&section);
        assert!(config.api_key.is_none());
        assert_eq!(config.max_tokens, section.max_output_tokens);
        assert_eq!(config.timeout, Duration::from_secs(section.timeout_secs));
    }

    #[test]
    fn test_debug_hides_key() {
        let generator =
            OpenAiGenerator::new(OpenAiConfig::new("m").with_api_key("sk-secret")).unwrap();
        let debug = format!("{:?}", generator);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("has_api_key: true"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let generator = OpenAiGenerator::new(
            OpenAiConfig::new("m")
                .with_base_url("http://127.0.0.1:9")
                .with_timeout(Duration::from_secs(2))
                .with_max_retries(0),
        )
        .unwrap();
        let err = generator
            .generate(GenerationRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Network(_)));
    }
}
