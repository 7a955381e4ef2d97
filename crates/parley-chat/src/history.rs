//! Per-session conversation history.
//!
//! [`HistoryStore`] is the injected state store behind the pipeline. Each
//! session owns an append-only list of turns plus an exchange lock, so the
//! orchestrator can run exchanges on one session one at a time while other
//! sessions proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use parley_core::config::SessionConfig;
use parley_core::types::ConversationTurn;

use crate::error::ChatError;

/// Snapshot of one session's turns in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub turns: Vec<ConversationTurn>,
}

impl SessionHistory {
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}

/// Held for the duration of one exchange on a session.
pub type ExchangeGuard = OwnedMutexGuard<()>;

/// Storage contract for session histories.
///
/// `get` creates an empty session on first reference; `peek` never creates.
/// `append` adds turns atomically with respect to other appends on the same
/// session.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<SessionHistory, ChatError>;

    async fn peek(&self, session_id: &str) -> Result<Option<SessionHistory>, ChatError>;

    async fn append(&self, session_id: &str, turns: Vec<ConversationTurn>)
        -> Result<(), ChatError>;

    /// Wait for exclusive use of the session for one exchange.
    async fn lock_session(&self, session_id: &str) -> Result<ExchangeGuard, ChatError>;

    async fn session_count(&self) -> Result<usize, ChatError>;
}

// =============================================================================
// InMemoryHistoryStore
// =============================================================================

struct SessionEntry {
    turns: Vec<ConversationTurn>,
    exchange_lock: Arc<tokio::sync::Mutex<()>>,
    last_access: Instant,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            turns: Vec::new(),
            exchange_lock: Arc::new(tokio::sync::Mutex::new(())),
            last_access: Instant::now(),
        }
    }

    /// A session is busy while anyone besides the map holds its lock handle.
    fn is_busy(&self) -> bool {
        Arc::strong_count(&self.exchange_lock) > 1
    }
}

/// Process-local history store.
///
/// Keeps every session for the life of the process unless an idle TTL or a
/// session cap is configured. Sessions with an exchange in flight are never
/// evicted.
pub struct InMemoryHistoryStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    idle_ttl: Option<Duration>,
    max_sessions: Option<usize>,
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHistoryStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl: None,
            max_sessions: None,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl: config
                .idle_ttl_minutes
                .map(|minutes| Duration::from_secs(minutes * 60)),
            max_sessions: config.max_sessions,
        }
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = Some(max_sessions);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SessionEntry>>, ChatError> {
        self.sessions
            .lock()
            .map_err(|e| ChatError::Session(format!("session lock poisoned: {}", e)))
    }

    /// Look up a session, creating it (and applying retention) if absent.
    fn entry<'a>(
        &self,
        sessions: &'a mut HashMap<String, SessionEntry>,
        session_id: &str,
    ) -> &'a mut SessionEntry {
        if !sessions.contains_key(session_id) {
            self.evict(sessions);
            debug!(session_id, "Creating session");
        }
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionEntry::new);
        entry.last_access = Instant::now();
        entry
    }

    /// Drop idle sessions, then the least recently used ones past the cap.
    fn evict(&self, sessions: &mut HashMap<String, SessionEntry>) {
        if let Some(ttl) = self.idle_ttl {
            let before = sessions.len();
            sessions.retain(|_, entry| entry.is_busy() || entry.last_access.elapsed() <= ttl);
            let expired = before - sessions.len();
            if expired > 0 {
                info!(expired, "Expired idle sessions");
            }
        }

        if let Some(max) = self.max_sessions {
            while sessions.len() >= max {
                let oldest = sessions
                    .iter()
                    .filter(|(_, entry)| !entry.is_busy())
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => {
                        sessions.remove(&id);
                        info!(session_id = %id, "Evicted least recently used session");
                    }
                    None => break,
                }
            }
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get(&self, session_id: &str) -> Result<SessionHistory, ChatError> {
        let mut sessions = self.lock()?;
        let entry = self.entry(&mut sessions, session_id);
        Ok(SessionHistory {
            session_id: session_id.to_string(),
            turns: entry.turns.clone(),
        })
    }

    async fn peek(&self, session_id: &str) -> Result<Option<SessionHistory>, ChatError> {
        let sessions = self.lock()?;
        Ok(sessions.get(session_id).map(|entry| SessionHistory {
            session_id: session_id.to_string(),
            turns: entry.turns.clone(),
        }))
    }

    async fn append(
        &self,
        session_id: &str,
        turns: Vec<ConversationTurn>,
    ) -> Result<(), ChatError> {
        let mut sessions = self.lock()?;
        let entry = self.entry(&mut sessions, session_id);
        entry.turns.extend(turns);
        debug!(session_id, turns = entry.turns.len(), "History appended");
        Ok(())
    }

    async fn lock_session(&self, session_id: &str) -> Result<ExchangeGuard, ChatError> {
        let handle = {
            let mut sessions = self.lock()?;
            self.entry(&mut sessions, session_id).exchange_lock.clone()
        };
        Ok(handle.lock_owned().await)
    }

    async fn session_count(&self) -> Result<usize, ChatError> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(question: &str, answer: &str) -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::human(question),
            ConversationTurn::assistant(answer),
        ]
    }

    #[tokio::test]
    async fn test_get_creates_empty_session() {
        let store = InMemoryHistoryStore::new();
        let history = store.get("s1").await.unwrap();
        assert!(history.is_empty());
        assert_eq!(history.session_id, "s1");
        assert_eq!(store.session_count().await.unwrap(), 1);

        // idempotent
        store.get("s1").await.unwrap();
        assert_eq!(store.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_peek_does_not_create() {
        let store = InMemoryHistoryStore::new();
        assert!(store.peek("unknown").await.unwrap().is_none());
        assert_eq!(store.session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = InMemoryHistoryStore::new();
        store.append("s1", exchange("q1", "a1")).await.unwrap();
        store.append("s1", exchange("q2", "a2")).await.unwrap();

        let texts: Vec<String> = store
            .get("s1")
            .await
            .unwrap()
            .turns
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(texts, vec!["q1", "a1", "q2", "a2"]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemoryHistoryStore::new();
        store.append("a", exchange("qa", "aa")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().len(), 2);
        assert!(store.get("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_lock_serializes_same_session() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let guard = store.lock_session("s1").await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock_session("s1").await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // other sessions are not blocked
        let _other = store.lock_session("s2").await.unwrap();

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_ttl_expires_sessions() {
        let store = InMemoryHistoryStore::new().with_idle_ttl(Duration::from_millis(10));
        store.append("old", exchange("q", "a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        store.get("new").await.unwrap();
        assert!(store.peek("old").await.unwrap().is_none());
        assert_eq!(store.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_max_sessions_evicts_least_recently_used() {
        let store = InMemoryHistoryStore::new().with_max_sessions(2);
        store.get("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.get("b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.get("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;

        store.get("c").await.unwrap();
        assert!(store.peek("a").await.unwrap().is_some());
        assert!(store.peek("b").await.unwrap().is_none());
        assert_eq!(store.session_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_busy_sessions_are_not_evicted() {
        let store = InMemoryHistoryStore::new().with_max_sessions(1);
        let _guard = store.lock_session("busy").await.unwrap();
        store.get("other").await.unwrap();
        assert!(store.peek("busy").await.unwrap().is_some());
    }

    #[test]
    fn test_from_config_defaults_unbounded() {
        let store = InMemoryHistoryStore::from_config(&SessionConfig::default());
        assert!(store.idle_ttl.is_none());
        assert!(store.max_sessions.is_none());
    }
}
