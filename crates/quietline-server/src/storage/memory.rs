use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use quietline_proto::{ChatNotification, InboxId, PublicIdentity, StoredMessage};

use super::{Storage, StorageError, StoredToken, username_matches};

/// In-memory storage implementation for tests
///
/// All state sits behind one `Arc<Mutex<_>>` so clones share it. A poisoned
/// lock is recovered rather than propagated: every mutation below leaves the
/// maps consistent before it can panic.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct Inbox {
    token: Option<StoredToken>,
    messages: Vec<StoredMessage>,
}

#[derive(Default)]
struct MemoryStorageInner {
    inboxes: HashMap<InboxId, Inbox>,
    new_chats: HashMap<String, Vec<ChatNotification>>,
    users: HashMap<String, PublicIdentity>,
}

impl MemoryStorageInner {
    fn inbox_mut(&mut self, inbox: InboxId) -> Result<&mut Inbox, StorageError> {
        self.inboxes.get_mut(&inbox).ok_or_else(|| StorageError::NotFound(format!("inbox {inbox}")))
    }
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of inboxes.
    pub fn inbox_count(&self) -> usize {
        self.lock().inboxes.len()
    }

    /// Total number of queued messages across all inboxes.
    pub fn total_message_count(&self) -> usize {
        self.lock().inboxes.values().map(|i| i.messages.len()).sum()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn create_inbox(&self, inbox: InboxId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.inboxes.contains_key(&inbox) {
            return Err(StorageError::Conflict(format!("inbox {inbox} exists")));
        }
        inner.inboxes.insert(inbox, Inbox::default());
        Ok(())
    }

    fn store_notification(
        &self,
        recipient: &str,
        notification: &ChatNotification,
    ) -> Result<(), StorageError> {
        self.lock().new_chats.entry(recipient.to_string()).or_default().push(notification.clone());
        Ok(())
    }

    fn load_new_chats(&self, recipient: &str) -> Result<Vec<ChatNotification>, StorageError> {
        Ok(self.lock().new_chats.get(recipient).cloned().unwrap_or_default())
    }

    fn delete_new_chats(&self, recipient: &str) -> Result<(), StorageError> {
        self.lock().new_chats.remove(recipient);
        Ok(())
    }

    fn load_token(&self, inbox: InboxId) -> Result<Option<StoredToken>, StorageError> {
        Ok(self.lock().inbox_mut(inbox)?.token.clone())
    }

    fn store_token(&self, inbox: InboxId, token: &StoredToken) -> Result<(), StorageError> {
        self.lock().inbox_mut(inbox)?.token = Some(token.clone());
        Ok(())
    }

    fn clear_token(&self, inbox: InboxId) -> Result<(), StorageError> {
        self.lock().inbox_mut(inbox)?.token = None;
        Ok(())
    }

    fn add_message(&self, inbox: InboxId, message: &StoredMessage) -> Result<(), StorageError> {
        self.lock().inbox_mut(inbox)?.messages.push(message.clone());
        Ok(())
    }

    fn load_messages(&self, inbox: InboxId) -> Result<Vec<StoredMessage>, StorageError> {
        Ok(self.lock().inbox_mut(inbox)?.messages.clone())
    }

    fn flush_inbox(&self, inbox: InboxId) -> Result<(), StorageError> {
        self.lock().inbox_mut(inbox)?.messages.clear();
        Ok(())
    }

    fn store_user(&self, username: &str, identity: &PublicIdentity) -> Result<(), StorageError> {
        self.lock().users.insert(username.to_string(), identity.clone());
        Ok(())
    }

    fn load_user(&self, username: &str) -> Result<Option<PublicIdentity>, StorageError> {
        Ok(self.lock().users.get(username).cloned())
    }

    fn search_users(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let inner = self.lock();
        let mut names: Vec<&String> =
            inner.users.keys().filter(|name| username_matches(name, query)).collect();
        names.sort();

        Ok(names.into_iter().skip(offset).take(limit).cloned().collect())
    }
}
