//! Follow-up question rephrasing.

use std::time::{Duration, Instant};

use tracing::debug;

use parley_core::types::ConversationTurn;
use parley_llm::SharedGenerator;

use crate::error::ChatError;
use crate::prompts;

/// Rewrites a context-dependent follow-up into a standalone question.
#[derive(Clone)]
pub struct QuestionRephraser {
    generator: SharedGenerator,
    timeout: Duration,
}

impl QuestionRephraser {
    pub fn new(generator: SharedGenerator, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Return a question that can be answered without the conversation.
    ///
    /// With no history the question is already standalone and is returned
    /// verbatim without calling the generator. Otherwise the generator's
    /// output is returned as-is.
    pub async fn rephrase(
        &self,
        history: &[ConversationTurn],
        question: &str,
    ) -> Result<String, ChatError> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let start = Instant::now();
        let request = prompts::rephrase_request(history, question);
        let standalone = tokio::time::timeout(self.timeout, self.generator.generate(request))
            .await
            .map_err(|_| ChatError::Timeout("rephrase", self.timeout.as_secs()))??;

        debug!(
            generator = self.generator.name(),
            history_turns = history.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Question rephrased"
        );
        Ok(standalone)
    }
}
