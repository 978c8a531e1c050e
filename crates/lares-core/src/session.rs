//! Session store
//!
//! Process-local conversational memory, keyed by an opaque session id.
//! The map is sharded with one lock per shard and one lock per entry,
//! so concurrent requests for different sessions never contend while
//! requests for the same session serialize on the entry's turn gate.
//! Capacity is bounded by LRU eviction.
//!
//! Locking discipline: the entry's `data` mutex is held only for
//! reading or mutating the session record, never across I/O. The
//! `turn_gate` is the per-session request serializer and may be held
//! across awaits.

use crate::types::{EnrichedCandidate, PartialRequirements};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Default session capacity before LRU eviction
pub const DEFAULT_SESSION_CAPACITY: usize = 1024;

/// Number of shards in the session map
const SHARD_COUNT: usize = 16;

/// Transcript author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant
    Assistant,
}

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Author
    pub role: Role,
    /// Message text
    pub text: String,
}

/// Server-side memory for one conversational thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Ordered message history
    pub transcript: Vec<Turn>,
    /// Requirements gathered so far
    pub partial: PartialRequirements,
    /// Most recent completed result set
    pub last_results: Option<Vec<EnrichedCandidate>>,
    /// Last touch, drives LRU eviction
    pub last_activity: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transcript: Vec::new(),
            partial: PartialRequirements::default(),
            last_results: None,
            last_activity: Utc::now(),
        }
    }

    /// Append a user turn.
    pub fn add_user_turn(&mut self, text: impl Into<String>) {
        self.transcript.push(Turn {
            role: Role::User,
            text: text.into(),
        });
        self.last_activity = Utc::now();
    }

    /// Append an assistant turn.
    pub fn add_assistant_turn(&mut self, text: impl Into<String>) {
        self.transcript.push(Turn {
            role: Role::Assistant,
            text: text.into(),
        });
        self.last_activity = Utc::now();
    }
}

/// One live session entry.
pub struct SessionEntry {
    /// Serializes whole requests for this session. Held across I/O.
    pub turn_gate: tokio::sync::Mutex<()>,
    data: Mutex<Session>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            turn_gate: tokio::sync::Mutex::new(()),
            data: Mutex::new(Session::new()),
        }
    }

    /// Run a closure over the session record. The data lock is held
    /// only for the closure; do no I/O inside.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.data.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut session)
    }

    fn last_activity(&self) -> DateTime<Utc> {
        self.with(|s| s.last_activity)
    }
}

/// Sharded, LRU-bounded session map.
pub struct SessionStore {
    shards: Vec<Mutex<HashMap<String, Arc<SessionEntry>>>>,
    capacity: usize,
    count: AtomicUsize,
}

impl SessionStore {
    /// Create a store with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            capacity,
            count: AtomicUsize::new(0),
        }
    }

    fn shard_for(&self, session_id: &str) -> &Mutex<HashMap<String, Arc<SessionEntry>>> {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Fetch a session entry, creating it lazily. Touches the entry's
    /// activity clock and evicts the least-recently-active session
    /// once the store is at capacity.
    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionEntry> {
        {
            let shard = self
                .shard_for(session_id)
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = shard.get(session_id) {
                let entry = Arc::clone(entry);
                drop(shard);
                entry.with(|s| s.last_activity = Utc::now());
                return entry;
            }
        }

        if self.count.load(Ordering::Relaxed) >= self.capacity {
            self.evict_lru();
        }

        let mut shard = self
            .shard_for(session_id)
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let entry = shard
            .entry(session_id.to_string())
            .or_insert_with(|| {
                self.count.fetch_add(1, Ordering::Relaxed);
                Arc::new(SessionEntry::new())
            })
            .clone();
        drop(shard);
        entry.with(|s| s.last_activity = Utc::now());
        entry
    }

    /// Remove the least-recently-active session across all shards.
    /// Shards are locked one at a time, so the choice is approximate
    /// under concurrent traffic; the capacity bound is what matters.
    fn evict_lru(&self) {
        let mut victim: Option<(usize, String, DateTime<Utc>)> = None;
        for (index, shard) in self.shards.iter().enumerate() {
            let shard = shard.lock().unwrap_or_else(|e| e.into_inner());
            for (id, entry) in shard.iter() {
                let activity = entry.last_activity();
                if victim
                    .as_ref()
                    .map(|(_, _, oldest)| activity < *oldest)
                    .unwrap_or(true)
                {
                    victim = Some((index, id.clone(), activity));
                }
            }
        }

        if let Some((index, id, _)) = victim {
            let mut shard = self.shards[index].lock().unwrap_or_else(|e| e.into_inner());
            if shard.remove(&id).is_some() {
                self.count.fetch_sub(1, Ordering::Relaxed);
                debug!(session_id = %id, "evicted least-recently-used session");
            }
        }
    }

    /// Look up a session without creating it.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.shard_for(session_id)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation() {
        let store = SessionStore::new(8);
        assert!(store.get("s1").is_none());
        let entry = store.get_or_create("s1");
        entry.with(|s| s.add_user_turn("olá"));
        assert_eq!(store.len(), 1);
        assert!(store.get("s1").is_some());
    }

    #[test]
    fn test_same_id_same_entry() {
        let store = SessionStore::new(8);
        let a = store.get_or_create("s1");
        a.with(|s| s.add_user_turn("first"));
        let b = store.get_or_create("s1");
        assert_eq!(b.with(|s| s.transcript.len()), 1);
    }

    #[test]
    fn test_transcript_order() {
        let session_entry = SessionStore::new(8).get_or_create("s1");
        session_entry.with(|s| {
            s.add_user_turn("u1");
            s.add_assistant_turn("a1");
            s.add_user_turn("u2");
            s.add_assistant_turn("a2");
        });
        session_entry.with(|s| {
            let roles: Vec<Role> = s.transcript.iter().map(|t| t.role).collect();
            assert_eq!(
                roles,
                vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
            );
        });
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let store = SessionStore::new(2);
        for i in 0..10 {
            let entry = store.get_or_create(&format!("session-{i}"));
            entry.with(|s| s.add_user_turn("hi"));
        }
        assert_eq!(store.len(), 2, "store grew past capacity");
        // The newest session survives.
        assert!(store.get("session-9").is_some());
        assert!(store.get("session-0").is_none());
    }

    #[test]
    fn test_touch_protects_from_eviction() {
        let store = SessionStore::new(2);
        store.get_or_create("keep");
        store.get_or_create("drop");
        // Touch "keep" so "drop" is the LRU victim.
        store.get_or_create("keep");
        store.get_or_create("new");
        assert!(store.get("keep").is_some());
        assert!(store.get("drop").is_none());
    }

    #[tokio::test]
    async fn test_turn_gate_serializes() {
        let store = Arc::new(SessionStore::new(8));
        let entry = store.get_or_create("s1");

        let guard = entry.turn_gate.lock().await;
        let entry2 = store.get_or_create("s1");
        assert!(entry2.turn_gate.try_lock().is_err());
        drop(guard);
        assert!(entry2.turn_gate.try_lock().is_ok());
    }
}
