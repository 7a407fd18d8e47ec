//! crates/learning_assistant_core/src/store.rs
//!
//! Process-wide registry of learning sessions.
//!
//! Sessions live in a `DashMap`, so lookups on different sessions never contend
//! on a global lock. Each session sits behind its own `tokio::sync::Mutex`,
//! which linearizes operations on that one session.

use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Session, SessionSnapshot};
use crate::error::{EngineError, EngineResult};

//=========================================================================================
// SessionHandle
//=========================================================================================

/// A stored session together with its bookkeeping timestamps.
pub struct SessionHandle {
    id: Uuid,
    created_at: DateTime<Utc>,
    /// Milliseconds since the epoch. Kept atomic so eviction never awaits the session lock.
    last_accessed_ms: AtomicI64,
    session: Mutex<Session>,
}

impl SessionHandle {
    fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_accessed_ms: AtomicI64::new(now.timestamp_millis()),
            session: Mutex::new(Session::new(id)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_accessed_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.created_at)
    }

    /// Acquires exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    pub fn touch(&self) {
        self.last_accessed_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn is_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> bool {
        now - self.last_accessed_at() > max_idle
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_accessed_at", &self.last_accessed_at())
            .finish_non_exhaustive()
    }
}

//=========================================================================================
// SessionStore
//=========================================================================================

/// Thread-safe session registry keyed by session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh session in `AwaitingDocument` and returns its id.
    ///
    /// The id is inserted through the map's entry API, so two callers can never
    /// both claim the same id even if the generator repeated itself.
    pub fn create(&self) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            match self.sessions.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(SessionHandle::new(id)));
                    info!(session_id = %id, "Created session");
                    return id;
                }
                Entry::Occupied(_) => {
                    debug!(session_id = %id, "Session id collision, regenerating");
                }
            }
        }
    }

    /// Looks up a session and marks it as recently used.
    pub fn get(&self, id: Uuid) -> EngineResult<Arc<SessionHandle>> {
        let handle = self
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        handle.touch();
        Ok(handle)
    }

    /// Drops a session. Returns whether it was present.
    pub fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            debug!(session_id = %id, "Removed session");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Takes a snapshot of every session.
    ///
    /// Handles are cloned out of the map first so no shard guard is held across an await.
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();

        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.lock().await.snapshot());
        }
        snapshots
    }

    /// Removes sessions that have not been looked up for longer than `max_idle`.
    ///
    /// Returns the number of sessions removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|id, handle| {
            let keep = !handle.is_idle(now, max_idle);
            if !keep {
                info!(session_id = %id, "Evicting idle session");
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }
}
