//! Storage abstraction for the inbox relay.
//!
//! The trait mirrors the relay operations one to one and knows nothing about
//! locking: callers serialize access per inbox and per recipient. The trait is
//! synchronous (no async) so backends stay plain and easy to test.

mod error;
mod memory;
mod redb;

pub use error::StorageError;
pub use memory::MemoryStorage;
use quietline_crypto::TOKEN_HASH_SIZE;
use quietline_proto::{ChatNotification, InboxId, PublicIdentity, SealedToken, StoredMessage};
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStorage;

/// A live inbox token as the relay keeps it.
///
/// Only the hash of the token is stored; the sealed copy is handed to the
/// recipient, who alone can open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    /// SHA-512 of the token
    pub hash: Vec<u8>,
    /// Token sealed for the recipient
    pub sealed: SealedToken,
}

impl StoredToken {
    /// Build from a token hash and its sealed form.
    pub fn new(hash: [u8; TOKEN_HASH_SIZE], sealed: SealedToken) -> Self {
        Self { hash: hash.to_vec(), sealed }
    }
}

/// Storage for inboxes, notifications, tokens and the user directory.
///
/// Must be Clone (shared by the relay and the directory), Send + Sync and
/// synchronous. Implementations share internal state via Arc, so clones access
/// the same underlying storage.
///
/// # Invariants
///
/// - Messages of one inbox are returned in the order they were added
/// - Operations on an inbox that was never created fail with `NotFound`
pub trait Storage: Clone + Send + Sync + 'static {
    /// Create an empty inbox.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the inbox exists
    fn create_inbox(&self, inbox: InboxId) -> Result<(), StorageError>;

    /// Append a new-chat notification for `recipient`.
    fn store_notification(
        &self,
        recipient: &str,
        notification: &ChatNotification,
    ) -> Result<(), StorageError>;

    /// All pending notifications for `recipient`, oldest first.
    fn load_new_chats(&self, recipient: &str) -> Result<Vec<ChatNotification>, StorageError>;

    /// Delete every pending notification for `recipient`.
    fn delete_new_chats(&self, recipient: &str) -> Result<(), StorageError>;

    /// Live token for `inbox`, if any.
    fn load_token(&self, inbox: InboxId) -> Result<Option<StoredToken>, StorageError>;

    /// Set the live token for `inbox`, replacing any previous one.
    fn store_token(&self, inbox: InboxId, token: &StoredToken) -> Result<(), StorageError>;

    /// Remove the live token for `inbox`. No-op if none is live.
    fn clear_token(&self, inbox: InboxId) -> Result<(), StorageError>;

    /// Append a message to the inbox queue.
    fn add_message(&self, inbox: InboxId, message: &StoredMessage) -> Result<(), StorageError>;

    /// Queued messages, oldest first.
    fn load_messages(&self, inbox: InboxId) -> Result<Vec<StoredMessage>, StorageError>;

    /// Delete every queued message.
    fn flush_inbox(&self, inbox: InboxId) -> Result<(), StorageError>;

    /// Store the identity bound to `username`, replacing any previous one.
    fn store_user(&self, username: &str, identity: &PublicIdentity) -> Result<(), StorageError>;

    /// Identity bound to `username`, if any.
    fn load_user(&self, username: &str) -> Result<Option<PublicIdentity>, StorageError>;

    /// Usernames containing `query` (ASCII case-insensitive) in byte order,
    /// skipping the first `offset` matches and returning at most `limit`.
    fn search_users(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StorageError>;
}

/// Whether `username` matches a search `query`.
pub(crate) fn username_matches(username: &str, query: &str) -> bool {
    query.is_empty() || username.to_ascii_lowercase().contains(&query.to_ascii_lowercase())
}
