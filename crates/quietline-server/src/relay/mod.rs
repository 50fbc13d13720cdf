//! Inbox relay.
//!
//! Stores ciphertext for offline recipients without learning who talks to
//! whom. An inbox is a random 32-byte code; a recipient proves access to its
//! queue with a token the relay issued sealed to the recipient's KEM key and
//! keeps only as a SHA-512 hash.
//!
//! # Locking
//!
//! Every operation on an inbox holds that inbox's lock, and every operation
//! on a recipient's notifications holds that recipient's lock. The composite
//! operations [`InboxRelay::drain`] and [`InboxRelay::enqueue`] hold the lock
//! for their whole duration, so no message can be added between the read and
//! the flush of a drain. There is no lock spanning the whole relay.

mod error;
mod locks;

pub use error::RelayError;
pub use locks::{KeyGuard, KeyedLocks};
use quietline_core::{Environment, issue_inbox_token};
use quietline_crypto::{KemPublicKey, hash_token, token_matches};
use quietline_proto::{ChatNotification, InboxId, SealedToken, StoredMessage};

use crate::storage::{Storage, StorageError, StoredToken};

/// Attempts at drawing an unused inbox id before giving up.
const CREATE_INBOX_ATTEMPTS: usize = 8;

/// Relay state over a storage backend.
pub struct InboxRelay<S: Storage, E: Environment> {
    storage: S,
    env: E,
    inbox_locks: KeyedLocks<InboxId>,
    recipient_locks: KeyedLocks<String>,
}

impl<S: Storage, E: Environment> InboxRelay<S, E> {
    /// Create a relay over `storage`, drawing randomness from `env`.
    pub fn new(storage: S, env: E) -> Self {
        Self { storage, env, inbox_locks: KeyedLocks::new(), recipient_locks: KeyedLocks::new() }
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Allocate a fresh inbox.
    ///
    /// # Errors
    ///
    /// - `Storage` if no unused id was found or the backend failed
    pub async fn create_inbox(&self) -> Result<InboxId, RelayError> {
        for _ in 0..CREATE_INBOX_ATTEMPTS {
            let inbox = InboxId(self.env.random_array());
            let _guard = self.inbox_locks.lock(inbox).await;

            match self.storage.create_inbox(inbox) {
                Ok(()) => return Ok(inbox),
                Err(StorageError::Conflict(_)) => {},
                Err(e) => return Err(e.into()),
            }
        }

        Err(RelayError::Storage(StorageError::Conflict("no free inbox id".to_string())))
    }

    /// Leave a new-chat notification for `recipient`.
    pub async fn notify_inbox(
        &self,
        recipient: &str,
        notification: &ChatNotification,
    ) -> Result<(), RelayError> {
        let _guard = self.recipient_locks.lock(recipient.to_string()).await;
        self.storage.store_notification(recipient, notification)?;
        Ok(())
    }

    /// Pending notifications for `recipient`, oldest first. Not consumed.
    pub async fn get_new_chats(
        &self,
        recipient: &str,
    ) -> Result<Vec<ChatNotification>, RelayError> {
        let _guard = self.recipient_locks.lock(recipient.to_string()).await;
        Ok(self.storage.load_new_chats(recipient)?)
    }

    /// Delete every pending notification for `recipient`.
    pub async fn delete_new_chats(&self, recipient: &str) -> Result<(), RelayError> {
        let _guard = self.recipient_locks.lock(recipient.to_string()).await;
        Ok(self.storage.delete_new_chats(recipient)?)
    }

    /// Take the pending notifications for `recipient`.
    ///
    /// Read and delete happen under one lock, so a notification arriving in
    /// between is kept for the next call.
    pub async fn take_new_chats(
        &self,
        recipient: &str,
    ) -> Result<Vec<ChatNotification>, RelayError> {
        let _guard = self.recipient_locks.lock(recipient.to_string()).await;
        let chats = self.storage.load_new_chats(recipient)?;
        if !chats.is_empty() {
            self.storage.delete_new_chats(recipient)?;
        }
        Ok(chats)
    }

    /// Sealed token for `inbox`, `None` when no token is live.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the inbox does not exist
    pub async fn get_token(&self, inbox: InboxId) -> Result<Option<SealedToken>, RelayError> {
        let _guard = self.inbox_locks.lock(inbox).await;
        Ok(self.storage.load_token(inbox)?.map(|t| t.sealed))
    }

    /// Issue a token for `inbox` sealed to `recipient`, or return the live one.
    pub async fn issue_or_get_token(
        &self,
        inbox: InboxId,
        recipient: &KemPublicKey,
    ) -> Result<SealedToken, RelayError> {
        let _guard = self.inbox_locks.lock(inbox).await;
        self.issue_or_get_token_locked(inbox, recipient)
    }

    /// Queued messages for `inbox`, after checking `token`. Not consumed.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the inbox does not exist
    /// - `Unauthorized` if no token is live or `token` does not match
    pub async fn get_messages(
        &self,
        inbox: InboxId,
        token: &[u8],
    ) -> Result<Vec<StoredMessage>, RelayError> {
        let _guard = self.inbox_locks.lock(inbox).await;
        self.check_token_locked(inbox, token)?;
        Ok(self.storage.load_messages(inbox)?)
    }

    /// Append a message without touching the token.
    pub async fn add_message(
        &self,
        inbox: InboxId,
        message: &StoredMessage,
    ) -> Result<(), RelayError> {
        let _guard = self.inbox_locks.lock(inbox).await;
        Ok(self.storage.add_message(inbox, message)?)
    }

    /// Delete every queued message.
    pub async fn flush_inbox(&self, inbox: InboxId) -> Result<(), RelayError> {
        let _guard = self.inbox_locks.lock(inbox).await;
        Ok(self.storage.flush_inbox(inbox)?)
    }

    /// Retire the live token.
    pub async fn clear_token(&self, inbox: InboxId) -> Result<(), RelayError> {
        let _guard = self.inbox_locks.lock(inbox).await;
        Ok(self.storage.clear_token(inbox)?)
    }

    /// Return the queue after checking `token`, then flush it and retire the
    /// token.
    ///
    /// A wrong token leaves queue and token untouched.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the inbox does not exist
    /// - `Unauthorized` if no token is live or `token` does not match
    pub async fn drain(
        &self,
        inbox: InboxId,
        token: &[u8],
    ) -> Result<Vec<StoredMessage>, RelayError> {
        let _guard = self.inbox_locks.lock(inbox).await;

        self.check_token_locked(inbox, token)?;
        let messages = self.storage.load_messages(inbox)?;

        // A crash between the two leaves an empty queue behind a live token;
        // the next enqueue reuses it
        self.storage.flush_inbox(inbox)?;
        self.storage.clear_token(inbox)?;

        Ok(messages)
    }

    /// Queue a message for an offline recipient, issuing a token if none is
    /// live.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the inbox does not exist
    pub async fn enqueue(
        &self,
        inbox: InboxId,
        recipient: &KemPublicKey,
        message: &StoredMessage,
    ) -> Result<(), RelayError> {
        let _guard = self.inbox_locks.lock(inbox).await;

        self.issue_or_get_token_locked(inbox, recipient)?;
        self.storage.add_message(inbox, message)?;
        Ok(())
    }

    fn issue_or_get_token_locked(
        &self,
        inbox: InboxId,
        recipient: &KemPublicKey,
    ) -> Result<SealedToken, RelayError> {
        if let Some(live) = self.storage.load_token(inbox)? {
            return Ok(live.sealed);
        }

        let (token, sealed) = issue_inbox_token(&self.env, recipient)
            .map_err(|e| RelayError::BadRequest(e.to_string()))?;
        self.storage.store_token(inbox, &StoredToken::new(hash_token(&token), sealed.clone()))?;

        Ok(sealed)
    }

    fn check_token_locked(&self, inbox: InboxId, token: &[u8]) -> Result<(), RelayError> {
        let live = self
            .storage
            .load_token(inbox)?
            .ok_or_else(|| RelayError::Unauthorized(format!("no live token for {inbox}")))?;

        if token_matches(token, &live.hash) {
            Ok(())
        } else {
            Err(RelayError::Unauthorized(format!("bad token for {inbox}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use quietline_core::{LocalIdentity, open_inbox_token, testing::SeededEnv};
    use quietline_crypto::IdentityKeys;

    use super::*;
    use crate::storage::MemoryStorage;

    fn relay() -> InboxRelay<MemoryStorage, SeededEnv> {
        InboxRelay::new(MemoryStorage::new(), SeededEnv::new(7))
    }

    fn bob() -> LocalIdentity {
        LocalIdentity::new("bob", IdentityKeys::from_seeds([1; 32], [2; 32]))
    }

    fn message(serial: u64) -> StoredMessage {
        StoredMessage { serial, ciphertext: vec![serial as u8; 16] }
    }

    #[tokio::test]
    async fn enqueue_then_drain_with_unsealed_token() {
        let relay = relay();
        let bob = bob();
        let inbox = relay.create_inbox().await.unwrap();

        relay.enqueue(inbox, bob.kem().public_key(), &message(1)).await.unwrap();
        relay.enqueue(inbox, bob.kem().public_key(), &message(2)).await.unwrap();

        let sealed = relay.get_token(inbox).await.unwrap().unwrap();
        let token = open_inbox_token(&sealed, bob.kem()).unwrap();

        let drained = relay.drain(inbox, &token).await.unwrap();
        assert_eq!(drained, vec![message(1), message(2)]);

        assert_eq!(relay.get_token(inbox).await.unwrap(), None, "token retired after drain");
        assert!(matches!(relay.drain(inbox, &token).await, Err(RelayError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn live_token_is_reused() {
        let relay = relay();
        let bob = bob();
        let inbox = relay.create_inbox().await.unwrap();

        let first = relay.issue_or_get_token(inbox, bob.kem().public_key()).await.unwrap();
        let second = relay.issue_or_get_token(inbox, bob.kem().public_key()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_inbox_is_not_found() {
        let relay = relay();
        let inbox = InboxId([0xAB; 32]);

        assert!(matches!(relay.get_token(inbox).await, Err(RelayError::NotFound(_))));
        assert!(matches!(relay.drain(inbox, &[0; 32]).await, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn take_new_chats_consumes() {
        let relay = relay();
        let notification = ChatNotification {
            enc_sender: vec![1],
            enc_inbox_code: vec![2],
            enc_signature: vec![3],
            enc_serial: vec![4],
            kem_ciphertext: vec![5],
        };

        relay.notify_inbox("bob", &notification).await.unwrap();
        assert_eq!(relay.take_new_chats("bob").await.unwrap(), vec![notification]);
        assert!(relay.take_new_chats("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_messages_does_not_consume() {
        let relay = relay();
        let bob = bob();
        let inbox = relay.create_inbox().await.unwrap();
        relay.enqueue(inbox, bob.kem().public_key(), &message(3)).await.unwrap();

        let sealed = relay.get_token(inbox).await.unwrap().unwrap();
        let token = open_inbox_token(&sealed, bob.kem()).unwrap();

        assert_eq!(relay.get_messages(inbox, &token).await.unwrap().len(), 1);
        relay.flush_inbox(inbox).await.unwrap();
        relay.clear_token(inbox).await.unwrap();

        assert_eq!(relay.storage().total_message_count(), 0);
        assert_eq!(relay.get_token(inbox).await.unwrap(), None);
    }
}
