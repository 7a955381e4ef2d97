//! Generator trait and shared retry logic.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::types::GenerationRequest;

/// Incremental text produced by a generator, in generation order.
///
/// Dropping the stream cancels generation.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

/// A language model that answers role-tagged prompts.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce the whole reply at once.
    async fn generate(&self, request: GenerationRequest) -> Result<String>;

    /// Produce the reply as a stream of text increments.
    ///
    /// An `Err` item means the generation failed partway; the stream yields
    /// nothing after it.
    async fn generate_stream(&self, request: GenerationRequest) -> Result<TokenStream>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// A generator that can be shared across tasks.
pub type SharedGenerator = Arc<dyn Generator>;

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures, rate limits).
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    generator_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                tracing::warn!(
                    generator = generator_name,
                    attempt,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(3, Duration::from_millis(10), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LlmError::Network("connection reset".into()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(2, Duration::from_millis(10), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::RateLimit("slow down".into()))
        })
        .await;

        assert!(matches!(result, Err(LlmError::RateLimit(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(5, Duration::from_millis(10), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Auth("bad key".into()))
        })
        .await;

        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
