//! Registry of live connections.
//!
//! Maps a username to the outbound queue of its live stream. The map is split
//! into shards, each behind its own `RwLock`, so registrations for different
//! users rarely contend. Locks are never held across an `.await`.

use std::{
    collections::HashMap,
    hash::{BuildHasher, RandomState},
    sync::{PoisonError, RwLock},
};

use quietline_proto::Frame;
use tokio::sync::mpsc;

/// Number of shards.
pub const SHARD_COUNT: usize = 16;

/// Outbound side of one live connection.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    /// Connection id, unique for the server's lifetime
    pub id: u64,
    /// Frames queued for the live stream
    pub outbound: mpsc::Sender<Frame>,
}

/// Live connections keyed by username.
///
/// One connection per user: registering again replaces the previous entry,
/// and unregistering only removes the entry if it still belongs to the
/// connection asking.
#[derive(Debug)]
pub struct ConnectionRegistry {
    shards: [RwLock<HashMap<String, LiveConnection>>; SHARD_COUNT],
    hasher: RandomState,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| RwLock::new(HashMap::new())),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, username: &str) -> &RwLock<HashMap<String, LiveConnection>> {
        let index = self.hasher.hash_one(username) as usize % SHARD_COUNT;
        &self.shards[index]
    }

    /// Register the live connection for `username`.
    ///
    /// Returns the connection it replaced, if any.
    pub fn register(&self, username: &str, connection: LiveConnection) -> Option<LiveConnection> {
        self.shard(username)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.to_string(), connection)
    }

    /// Remove `username`'s entry if it is still connection `id`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, username: &str, id: u64) -> bool {
        let mut shard = self.shard(username).write().unwrap_or_else(PoisonError::into_inner);
        if shard.get(username).is_some_and(|c| c.id == id) {
            shard.remove(username);
            return true;
        }
        false
    }

    /// Outbound queue of `username`'s live connection.
    pub fn outbound(&self, username: &str) -> Option<mpsc::Sender<Frame>> {
        self.shard(username)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .map(|c| c.outbound.clone())
    }

    /// Whether `username` has a live connection.
    pub fn is_online(&self, username: &str) -> bool {
        self.shard(username).read().unwrap_or_else(PoisonError::into_inner).contains_key(username)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
