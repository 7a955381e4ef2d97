//! Parley LLM crate - the generator abstraction used by the chat pipeline.
//!
//! [`Generator`] is the seam between the pipeline and a language model. The
//! crate ships an OpenAI-compatible streaming client and a scripted
//! [`MockGenerator`] for tests.

pub mod error;
pub mod generator;
pub mod mock;
pub mod openai;
pub mod types;

pub use error::{LlmError, Result};
pub use generator::{with_retry, Generator, SharedGenerator, TokenStream};
pub use mock::{MockGenerator, MockReply};
pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use types::{ChatMessage, ChatRole, GenerationRequest};
