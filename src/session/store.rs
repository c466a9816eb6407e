//! In-memory map from [`SessionId`] to [`UserSession`].
//!
//! # Design
//!
//! A sharded `DashMap` holds one `tokio::sync::Mutex` per session. Operations
//! on different sessions never contend beyond a shard; operations on the same
//! session are serialized by its mutex, which [`SessionStore::lock`] lets a
//! caller hold across network I/O (refresh, revoke) so no update is lost.
//!
//! Map guards are never held across an `.await`: the per-session `Arc` is
//! cloned out first, then locked.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::types::{SessionId, UserSession};

/// Exclusive access to one session, held across `.await` points.
pub type SessionGuard = OwnedMutexGuard<UserSession>;

type SessionCell = Arc<Mutex<UserSession>>;

/// Concurrency-safe session map.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionCell>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session` under a fresh identifier and return it.
    pub fn create(&self, session: UserSession) -> SessionId {
        loop {
            let id = SessionId::generate();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                slot.insert(Arc::new(Mutex::new(session)));
                debug!(session = %id.fingerprint(), "Session created");
                return id;
            }
        }
    }

    /// Snapshot of a session. `None` is the normal answer for unknown ids.
    pub async fn get(&self, id: &SessionId) -> Option<UserSession> {
        let guard = self.lock(id).await?;
        Some(guard.clone())
    }

    /// Mutate a session in place. Returns `None` if it does not exist.
    pub async fn update<F, R>(&self, id: &SessionId, mutate: F) -> Option<R>
    where
        F: FnOnce(&mut UserSession) -> R,
    {
        let mut guard = self.lock(id).await?;
        let result = mutate(&mut *guard);
        guard.touch();
        Some(result)
    }

    /// Acquire exclusive access to a session for a read-modify-write that
    /// spans I/O. Returns `None` if the session does not exist or was deleted
    /// while waiting for the lock.
    pub async fn lock(&self, id: &SessionId) -> Option<SessionGuard> {
        let cell = self.cell(id)?;
        let guard = Arc::clone(&cell).lock_owned().await;

        // logout may have won the race for the lock
        match self.cell(id) {
            Some(current) if Arc::ptr_eq(&current, &cell) => Some(guard),
            _ => None,
        }
    }

    /// Remove a session. Idempotent; returns whether it existed.
    pub fn delete(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session = %id.fingerprint(), "Session deleted");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn cell(&self, id: &SessionId) -> Option<SessionCell> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }
}
