//! Session store keyed by inbox id.
//!
//! The map itself sits behind a short-lived `std::sync::RwLock`; each session
//! has its own async mutex, held across encrypt, transmit and commit. No lock
//! guard of the map is ever held across an `.await`.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use quietline_core::ChatSession;
use quietline_proto::InboxId;
use tokio::sync::Mutex;

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<ChatSession>>;

/// All chats known to this client.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<InboxId, SessionHandle>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session unless its inbox is already known.
    ///
    /// Returns `false` if an entry existed; the existing session is kept.
    pub fn insert_if_absent(&self, session: ChatSession) -> bool {
        let inbox = session.inbox_id();
        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        if map.contains_key(&inbox) {
            return false;
        }
        map.insert(inbox, Arc::new(Mutex::new(session)));
        true
    }

    /// Handle for `inbox`.
    pub fn get(&self, inbox: &InboxId) -> Option<SessionHandle> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).get(inbox).cloned()
    }

    /// Whether `inbox` is known.
    pub fn contains(&self, inbox: &InboxId) -> bool {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).contains_key(inbox)
    }

    /// Snapshot of known inbox ids.
    pub fn inbox_ids(&self) -> Vec<InboxId> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).keys().copied().collect()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
