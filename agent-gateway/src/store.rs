//! Bounded, time-expiring mapping from session ids to backend conversations.
//!
//! Expired entries are dropped lazily on every access; there is no background
//! sweeper. Capacity pressure evicts the least-recently-touched entry first.

use crate::backend::ConversationBackend;
use crate::error::GatewayError;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Prefix of the backend user id derived from a session id.
const BACKEND_USER_PREFIX: &str = "user_";

/// Backend conversation bound to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    pub app_conversation_id: String,
    pub backend_user_id: String,
}

/// Store counters for the `/stats` route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub active_conversations: usize,
    pub pending_creations: usize,
    pub max_conversations: usize,
    pub timeout_secs: u64,
}

type CreationLock = Arc<tokio::sync::Mutex<()>>;

struct StoreState {
    /// Recency order doubles as `last_touched` order.
    entries: LruCache<String, (ConversationEntry, Instant)>,
    /// Per-id creation locks, present while a create call may be running.
    in_flight: HashMap<String, CreationLock>,
}

impl StoreState {
    /// Return the live entry for `session_id`, refreshing its timestamp.
    fn touch(&mut self, session_id: &str, now: Instant) -> Option<ConversationEntry> {
        let (entry, last_touched) = self.entries.get_mut(session_id)?;
        *last_touched = now;
        Some(entry.clone())
    }

    /// Drop entries idle for longer than `timeout`, oldest first.
    fn evict_expired(&mut self, now: Instant, timeout: Duration) {
        let mut expired = 0usize;
        while let Some((_, (_, last_touched))) = self.entries.peek_lru() {
            if now.saturating_duration_since(*last_touched) <= timeout {
                break;
            }
            self.entries.pop_lru();
            expired += 1;
        }
        if expired > 0 {
            tracing::debug!(expired, "Evicted expired conversations");
        }
    }

    fn insert(&mut self, session_id: &str, entry: ConversationEntry, now: Instant) {
        if let Some((evicted, _)) = self.entries.push(session_id.to_string(), (entry, now)) {
            if evicted != session_id {
                tracing::debug!(session_id = %evicted, "Evicted least recently used conversation");
            }
        }
    }

    /// Forget the creation lock once no other caller holds it.
    fn release_creation_lock(&mut self, session_id: &str, lock: &CreationLock) {
        let idle = self
            .in_flight
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) <= 2);
        if idle {
            self.in_flight.remove(session_id);
        }
    }
}

/// Claim on a session's creation lock. Dropping it, including when the
/// request future is cancelled, releases the `in_flight` entry.
struct CreationClaim<'a> {
    store: &'a ConversationStore,
    session_id: &'a str,
    lock: CreationLock,
}

impl Drop for CreationClaim<'_> {
    fn drop(&mut self) {
        self.store
            .lock_state()
            .release_creation_lock(self.session_id, &self.lock);
    }
}

/// Session store shared by all request handlers.
pub struct ConversationStore {
    backend: Arc<dyn ConversationBackend>,
    state: Mutex<StoreState>,
    timeout: Duration,
}

impl ConversationStore {
    /// Create an empty store. `max_conversations` is clamped to at least one.
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        max_conversations: usize,
        timeout: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_conversations).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            state: Mutex::new(StoreState {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
            }),
            timeout,
        }
    }

    /// The state lock is never held across an `.await`.
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the conversation for `session_id`, creating it on the backend if needed.
    ///
    /// Concurrent calls for the same new id share one backend create call.
    /// A failed or cancelled create leaves the store unchanged.
    pub async fn resolve_or_create(
        &self,
        session_id: &str,
    ) -> Result<ConversationEntry, GatewayError> {
        let claim = {
            let mut state = self.lock_state();
            let now = Instant::now();
            state.evict_expired(now, self.timeout);

            if let Some(entry) = state.touch(session_id, now) {
                tracing::debug!(session_id, conversation_id = %entry.app_conversation_id, "Reusing conversation");
                return Ok(entry);
            }

            let lock = Arc::clone(
                state
                    .in_flight
                    .entry(session_id.to_string())
                    .or_default(),
            );
            CreationClaim {
                store: self,
                session_id,
                lock,
            }
        };

        let _creating = claim.lock.lock().await;
        self.create_if_absent(session_id).await
    }

    async fn create_if_absent(&self, session_id: &str) -> Result<ConversationEntry, GatewayError> {
        // Another caller may have finished creating while we waited.
        let existing = self.lock_state().touch(session_id, Instant::now());
        if let Some(entry) = existing {
            return Ok(entry);
        }

        let backend_user_id = format!("{}{}", BACKEND_USER_PREFIX, session_id);
        let app_conversation_id = self
            .backend
            .create_conversation(&backend_user_id, &Map::new())
            .await?;

        let entry = ConversationEntry {
            app_conversation_id,
            backend_user_id,
        };

        let mut state = self.lock_state();
        let now = Instant::now();
        state.evict_expired(now, self.timeout);
        state.insert(session_id, entry.clone(), now);

        tracing::info!(
            session_id,
            conversation_id = %entry.app_conversation_id,
            active = state.entries.len(),
            "Created conversation"
        );
        Ok(entry)
    }

    /// Current counters. Runs the expiry pass first.
    pub fn stats(&self) -> StoreStats {
        let mut state = self.lock_state();
        state.evict_expired(Instant::now(), self.timeout);

        StoreStats {
            active_conversations: state.entries.len(),
            pending_creations: state.in_flight.len(),
            max_conversations: state.entries.cap().get(),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}
