//! Conversation orchestrator: runs one question through the pipeline.
//!
//! An exchange moves through
//! `Start → Rephrasing → Retrieving → Assembling → Generating → Committing → Done`,
//! or ends in `Failed` from any earlier state. Everything up to and including
//! the first generated token runs inside [`ConversationOrchestrator::ask`], so
//! early failures surface as an `Err` before any output exists. The rest of
//! the generation runs on a spawned task that fans each token out to the
//! caller's channel and to a local accumulator, and commits the exchange to
//! the history store only once the generator has finished.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::config::ChatConfig;
use parley_core::types::{ConversationTurn, PipelineRequest};
use parley_llm::{SharedGenerator, TokenStream};
use parley_vector::search::Retriever;

use crate::context::ContextAssembler;
use crate::error::ChatError;
use crate::history::{ExchangeGuard, HistoryStore, SessionHistory};
use crate::prompts;
use crate::rephraser::QuestionRephraser;

/// Tokens buffered between the generation task and a slow caller.
const ANSWER_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Exchange state
// =============================================================================

/// Pipeline state of a single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Start,
    Rephrasing,
    Retrieving,
    Assembling,
    Generating,
    Committing,
    Done,
    Failed,
}

impl std::fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Rephrasing => "rephrasing",
            Self::Retrieving => "retrieving",
            Self::Assembling => "assembling",
            Self::Generating => "generating",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Identity and progress of one exchange, used for logging.
#[derive(Debug)]
struct Exchange {
    id: Uuid,
    session_id: String,
    state: ExchangeState,
    started: Instant,
}

impl Exchange {
    fn new(session_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            state: ExchangeState::Start,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: ExchangeState) {
        debug!(
            exchange_id = %self.id,
            session_id = %self.session_id,
            from = %self.state,
            to = %next,
            "Exchange state transition"
        );
        self.state = next;
    }

    fn fail(&mut self, err: ChatError) -> ChatError {
        warn!(
            exchange_id = %self.id,
            session_id = %self.session_id,
            state = %self.state,
            error = %err,
            "Exchange failed"
        );
        self.state = ExchangeState::Failed;
        err
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

// =============================================================================
// Answer stream
// =============================================================================

/// Messages from the generation task to the caller.
#[derive(Debug)]
enum AnswerEvent {
    Token(String),
    /// Generation finished and the exchange was committed.
    Completed,
    Failed(ChatError),
}

/// The answer of an exchange, streamed in generation order.
///
/// Yields `Ok(token)` items and ends after the exchange is committed. A
/// failure after the first token is yielded as a final `Err`; the stream
/// never ends cleanly unless the answer was complete and committed.
/// Dropping the stream cancels generation and discards the exchange.
#[derive(Debug)]
pub struct AnswerStream {
    exchange_id: Uuid,
    standalone_question: String,
    fragments: usize,
    receiver: mpsc::Receiver<AnswerEvent>,
    finished: bool,
}

impl AnswerStream {
    pub fn exchange_id(&self) -> Uuid {
        self.exchange_id
    }

    /// The question actually used for retrieval and generation.
    pub fn standalone_question(&self) -> &str {
        &self.standalone_question
    }

    /// Number of fragments in the grounding context.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Drain the stream into the full answer text.
    pub async fn collect_text(mut self) -> Result<String, ChatError> {
        let mut answer = String::new();
        while let Some(token) = self.next().await {
            answer.push_str(&token?);
        }
        Ok(answer)
    }
}

impl Stream for AnswerStream {
    type Item = Result<String, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(AnswerEvent::Token(token))) => Poll::Ready(Some(Ok(token))),
            Poll::Ready(Some(AnswerEvent::Completed)) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(AnswerEvent::Failed(err))) => {
                self.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Err(ChatError::Generation(
                    "generation stopped before completion".to_string(),
                ))))
            }
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runtime settings of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_question_length: usize,
    /// Bound on each rephrase call, retrieval and wait for the next token.
    pub stage_timeout: Duration,
    /// Hold a per-session lock for the whole exchange.
    pub serialize_sessions: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for OrchestratorConfig {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_question_length: config.max_question_length,
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
            serialize_sessions: config.serialize_sessions,
        }
    }
}

/// Composes rephrasing, retrieval, context assembly, generation and history
/// into the conversational pipeline.
pub struct ConversationOrchestrator {
    store: Arc<dyn HistoryStore>,
    retriever: Retriever,
    rephraser: QuestionRephraser,
    assembler: ContextAssembler,
    generator: SharedGenerator,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        retriever: Retriever,
        generator: SharedGenerator,
        config: OrchestratorConfig,
    ) -> Self {
        let rephraser = QuestionRephraser::new(generator.clone(), config.stage_timeout);
        Self {
            store,
            retriever,
            rephraser,
            assembler: ContextAssembler,
            generator,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Turns of a session without creating it.
    pub async fn history(&self, session_id: &str) -> Result<Option<SessionHistory>, ChatError> {
        self.store.peek(session_id).await
    }

    /// Answer a question within its session.
    ///
    /// Returns once the first token is available (or the answer turned out
    /// empty). Validation, rephrase, retrieval and pre-token generation
    /// failures are returned here and nothing is committed.
    pub async fn ask(&self, request: PipelineRequest) -> Result<AnswerStream, ChatError> {
        self.validate(&request)?;
        let PipelineRequest {
            session_id,
            question,
        } = request;

        let mut exchange = Exchange::new(&session_id);
        info!(
            exchange_id = %exchange.id,
            session_id = %session_id,
            question_len = question.chars().count(),
            "Exchange started"
        );

        let guard = if self.config.serialize_sessions {
            Some(
                self.store
                    .lock_session(&session_id)
                    .await
                    .map_err(|e| exchange.fail(e))?,
            )
        } else {
            None
        };

        let history = self
            .store
            .get(&session_id)
            .await
            .map_err(|e| exchange.fail(e))?;

        exchange.advance(ExchangeState::Rephrasing);
        let standalone = self
            .rephraser
            .rephrase(&history.turns, &question)
            .await
            .map_err(|e| exchange.fail(e))?;

        exchange.advance(ExchangeState::Retrieving);
        let timeout = self.config.stage_timeout;
        let fragments = tokio::time::timeout(timeout, self.retriever.retrieve(&standalone))
            .await
            .map_err(|_| exchange.fail(ChatError::Timeout("retrieval", timeout.as_secs())))?
            .map_err(|e| exchange.fail(e.into()))?;

        exchange.advance(ExchangeState::Assembling);
        let context = self.assembler.assemble(&fragments);

        exchange.advance(ExchangeState::Generating);
        let prompt = prompts::answer_request(&context, &history.turns, &standalone);
        let mut tokens = tokio::time::timeout(timeout, self.generator.generate_stream(prompt))
            .await
            .map_err(|_| exchange.fail(ChatError::Timeout("generation", timeout.as_secs())))?
            .map_err(|e| exchange.fail(e.into()))?;

        let first = next_token(&mut tokens, timeout)
            .await
            .map_err(|e| exchange.fail(e))?;

        let (tx, rx) = mpsc::channel(ANSWER_CHANNEL_CAPACITY);
        let answer = AnswerStream {
            exchange_id: exchange.id,
            standalone_question: standalone,
            fragments: fragments.len(),
            receiver: rx,
            finished: false,
        };

        let mut task = GenerationTask {
            exchange,
            store: self.store.clone(),
            session_id,
            question,
            accumulated: String::new(),
            token_count: 0,
            exhausted: first.is_none(),
            tokens,
            tx,
            timeout,
            _guard: guard,
        };
        if let Some(token) = first {
            task.accumulated.push_str(&token);
            task.token_count += 1;
            // The channel is empty and the receiver is alive, so this cannot fail.
            let _ = task.tx.try_send(AnswerEvent::Token(token));
        }
        tokio::spawn(task.run());

        Ok(answer)
    }

    fn validate(&self, request: &PipelineRequest) -> Result<(), ChatError> {
        if request.session_id.trim().is_empty() {
            return Err(ChatError::EmptySessionId);
        }
        if request.question.trim().is_empty() {
            return Err(ChatError::EmptyQuestion);
        }
        if request.question.chars().count() > self.config.max_question_length {
            return Err(ChatError::QuestionTooLong(self.config.max_question_length));
        }
        Ok(())
    }
}

/// Wait for the next generated token, bounded by `timeout`.
///
/// `Ok(None)` means the generator finished.
async fn next_token(tokens: &mut TokenStream, timeout: Duration) -> Result<Option<String>, ChatError> {
    match tokio::time::timeout(timeout, tokens.next()).await {
        Err(_) => Err(ChatError::Timeout("generation", timeout.as_secs())),
        Ok(None) => Ok(None),
        Ok(Some(Ok(token))) => Ok(Some(token)),
        Ok(Some(Err(e))) => Err(e.into()),
    }
}

// =============================================================================
// Generation task
// =============================================================================

/// Owns the rest of an exchange once the first token has been produced.
struct GenerationTask {
    exchange: Exchange,
    store: Arc<dyn HistoryStore>,
    session_id: String,
    question: String,
    accumulated: String,
    token_count: usize,
    exhausted: bool,
    tokens: TokenStream,
    tx: mpsc::Sender<AnswerEvent>,
    timeout: Duration,
    _guard: Option<ExchangeGuard>,
}

impl GenerationTask {
    async fn run(mut self) {
        while !self.exhausted {
            let next = tokio::select! {
                _ = self.tx.closed() => {
                    self.cancel();
                    return;
                }
                next = next_token(&mut self.tokens, self.timeout) => next,
            };

            match next {
                Ok(Some(token)) => {
                    self.accumulated.push_str(&token);
                    self.token_count += 1;
                    if self.tx.send(AnswerEvent::Token(token)).await.is_err() {
                        self.cancel();
                        return;
                    }
                }
                Ok(None) => self.exhausted = true,
                Err(e) => {
                    let err = self.exchange.fail(e);
                    let _ = self.tx.send(AnswerEvent::Failed(err)).await;
                    return;
                }
            }
        }

        // Commit only once the caller has taken every token. After this the
        // only thing it has not seen is the end-of-stream marker.
        let reserved = match self.tx.reserve_many(ANSWER_CHANNEL_CAPACITY).await {
            Ok(permits) => {
                drop(permits);
                true
            }
            Err(_) => false,
        };
        if !reserved {
            self.cancel();
            return;
        }

        self.exchange.advance(ExchangeState::Committing);
        let answer = std::mem::take(&mut self.accumulated);
        let answer_len = answer.chars().count();
        let turns = vec![
            ConversationTurn::human(std::mem::take(&mut self.question)),
            ConversationTurn::assistant(answer),
        ];

        match self.store.append(&self.session_id, turns).await {
            Ok(()) => {
                self.exchange.advance(ExchangeState::Done);
                info!(
                    exchange_id = %self.exchange.id,
                    session_id = %self.session_id,
                    tokens = self.token_count,
                    answer_len,
                    elapsed_ms = self.exchange.elapsed_ms(),
                    "Exchange committed"
                );
                let _ = self.tx.send(AnswerEvent::Completed).await;
            }
            Err(e) => {
                let err = self.exchange.fail(e);
                let _ = self.tx.send(AnswerEvent::Failed(err)).await;
            }
        }
    }

    /// Caller went away: drop the generator stream and discard the answer.
    fn cancel(&mut self) {
        self.accumulated.clear();
        self.exchange.fail(ChatError::Cancelled);
        info!(
            exchange_id = %self.exchange.id,
            session_id = %self.session_id,
            tokens = self.token_count,
            "Exchange cancelled before commit"
        );
    }
}
