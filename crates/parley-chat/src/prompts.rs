//! Prompt templates for the rephrase and answer steps.

use parley_core::types::ConversationTurn;
use parley_llm::{ChatMessage, GenerationRequest};

/// System instruction for turning a follow-up into a standalone question.
pub const REPHRASE_SYSTEM_PROMPT: &str = "Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question.";

/// System instruction for the answer step. `{context}` is replaced with the
/// assembled fragments.
pub const ANSWER_SYSTEM_TEMPLATE: &str = "You are an experienced researcher, expert at interpreting and answering questions based on provided sources. Using the below provided context and chat history, answer the user's question to the best of your ability using only the resources provided. Be verbose!

<context>
{context}
</context>";

/// Final human message of the rephrase step.
pub fn rephrase_instruction(question: &str) -> String {
    format!(
        "Rephrase the following question as a standalone question:\n{}",
        question
    )
}

/// Final human message of the answer step.
pub fn answer_instruction(standalone_question: &str) -> String {
    format!(
        "Now, answer this question using the previous context and chat history:\n\n{}",
        standalone_question
    )
}

/// Rephrase prompt: system instruction, the full history, then the follow-up.
pub fn rephrase_request(history: &[ConversationTurn], question: &str) -> GenerationRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(REPHRASE_SYSTEM_PROMPT));
    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(rephrase_instruction(question)));
    GenerationRequest::new(messages)
}

/// Answer prompt: system template with the context block, the full history,
/// then the standalone question.
pub fn answer_request(
    context: &str,
    history: &[ConversationTurn],
    standalone_question: &str,
) -> GenerationRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(
        ANSWER_SYSTEM_TEMPLATE.replace("{context}", context),
    ));
    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(answer_instruction(standalone_question)));
    GenerationRequest::new(messages)
}
