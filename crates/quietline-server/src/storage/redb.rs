//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Inboxes, queues, tokens, notifications and the user directory all survive
//! server restarts.

use std::{path::Path, sync::Arc};

use quietline_proto::{ChatNotification, InboxId, PublicIdentity, StoredMessage};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Serialize, de::DeserializeOwned};

use super::{Storage, StorageError, StoredToken, username_matches};

/// Table: inboxes
/// Key: inbox id [32 bytes]
/// Value: empty
const INBOXES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("inboxes");

/// Table: tokens
/// Key: inbox id [32 bytes]
/// Value: CBOR-encoded StoredToken
const TOKENS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tokens");

/// Table: messages
/// Key: (inbox id, sequence: u64 BE) [40 bytes]
/// Value: CBOR-encoded StoredMessage
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: new_chats
/// Key: (recipient, 0x00, sequence: u64 BE)
/// Value: CBOR-encoded ChatNotification
const NEW_CHATS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("new_chats");

/// Table: users
/// Key: username
/// Value: CBOR-encoded PublicIdentity
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

fn io(e: impl std::fmt::Display) -> StorageError {
    StorageError::Io(e.to_string())
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates all tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(INBOXES).map_err(io)?;
            let _ = txn.open_table(TOKENS).map_err(io)?;
            let _ = txn.open_table(MESSAGES).map_err(io)?;
            let _ = txn.open_table(NEW_CHATS).map_err(io)?;
            let _ = txn.open_table(USERS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Run `f` in a write transaction and commit it if `f` succeeds.
    fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let value = f(&txn)?;
        txn.commit().map_err(io)?;
        Ok(value)
    }

    fn require_inbox(
        table: &impl ReadableTable<&'static [u8], &'static [u8]>,
        inbox: InboxId,
    ) -> Result<(), StorageError> {
        match table.get(inbox.as_bytes().as_slice()).map_err(io)? {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(format!("inbox {inbox}"))),
        }
    }
}

impl Storage for RedbStorage {
    fn create_inbox(&self, inbox: InboxId) -> Result<(), StorageError> {
        self.write(|txn| {
            let mut table = txn.open_table(INBOXES).map_err(io)?;
            if table.get(inbox.as_bytes().as_slice()).map_err(io)?.is_some() {
                return Err(StorageError::Conflict(format!("inbox {inbox} exists")));
            }
            let empty: &[u8] = &[];
            table.insert(inbox.as_bytes().as_slice(), empty).map_err(io)?;
            Ok(())
        })
    }

    fn store_notification(
        &self,
        recipient: &str,
        notification: &ChatNotification,
    ) -> Result<(), StorageError> {
        let bytes = encode(notification)?;
        self.write(|txn| {
            let mut table = txn.open_table(NEW_CHATS).map_err(io)?;
            let prefix = recipient_prefix(recipient);
            let next = next_sequence(&table, &prefix)?;
            table.insert(sequence_key(&prefix, next).as_slice(), bytes.as_slice()).map_err(io)?;
            Ok(())
        })
    }

    fn load_new_chats(&self, recipient: &str) -> Result<Vec<ChatNotification>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(NEW_CHATS).map_err(io)?;
        load_sequence(&table, &recipient_prefix(recipient))
    }

    fn delete_new_chats(&self, recipient: &str) -> Result<(), StorageError> {
        self.write(|txn| {
            let mut table = txn.open_table(NEW_CHATS).map_err(io)?;
            delete_sequence(&mut table, &recipient_prefix(recipient))
        })
    }

    fn load_token(&self, inbox: InboxId) -> Result<Option<StoredToken>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        Self::require_inbox(&txn.open_table(INBOXES).map_err(io)?, inbox)?;

        let table = txn.open_table(TOKENS).map_err(io)?;
        match table.get(inbox.as_bytes().as_slice()).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn store_token(&self, inbox: InboxId, token: &StoredToken) -> Result<(), StorageError> {
        let bytes = encode(token)?;
        self.write(|txn| {
            Self::require_inbox(&txn.open_table(INBOXES).map_err(io)?, inbox)?;
            let mut table = txn.open_table(TOKENS).map_err(io)?;
            table.insert(inbox.as_bytes().as_slice(), bytes.as_slice()).map_err(io)?;
            Ok(())
        })
    }

    fn clear_token(&self, inbox: InboxId) -> Result<(), StorageError> {
        self.write(|txn| {
            Self::require_inbox(&txn.open_table(INBOXES).map_err(io)?, inbox)?;
            let mut table = txn.open_table(TOKENS).map_err(io)?;
            table.remove(inbox.as_bytes().as_slice()).map_err(io)?;
            Ok(())
        })
    }

    fn add_message(&self, inbox: InboxId, message: &StoredMessage) -> Result<(), StorageError> {
        let bytes = encode(message)?;
        self.write(|txn| {
            Self::require_inbox(&txn.open_table(INBOXES).map_err(io)?, inbox)?;
            let mut table = txn.open_table(MESSAGES).map_err(io)?;
            let prefix = inbox.as_bytes().to_vec();
            let next = next_sequence(&table, &prefix)?;
            table.insert(sequence_key(&prefix, next).as_slice(), bytes.as_slice()).map_err(io)?;
            Ok(())
        })
    }

    fn load_messages(&self, inbox: InboxId) -> Result<Vec<StoredMessage>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        Self::require_inbox(&txn.open_table(INBOXES).map_err(io)?, inbox)?;

        let table = txn.open_table(MESSAGES).map_err(io)?;
        load_sequence(&table, inbox.as_bytes())
    }

    fn flush_inbox(&self, inbox: InboxId) -> Result<(), StorageError> {
        self.write(|txn| {
            Self::require_inbox(&txn.open_table(INBOXES).map_err(io)?, inbox)?;
            let mut table = txn.open_table(MESSAGES).map_err(io)?;
            delete_sequence(&mut table, inbox.as_bytes())
        })
    }

    fn store_user(&self, username: &str, identity: &PublicIdentity) -> Result<(), StorageError> {
        let bytes = encode(identity)?;
        self.write(|txn| {
            let mut table = txn.open_table(USERS).map_err(io)?;
            table.insert(username, bytes.as_slice()).map_err(io)?;
            Ok(())
        })
    }

    fn load_user(&self, username: &str) -> Result<Option<PublicIdentity>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(USERS).map_err(io)?;
        match table.get(username).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn search_users(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(USERS).map_err(io)?;

        let mut names = Vec::new();
        let mut skipped = 0;
        for entry in table.iter().map_err(io)? {
            if names.len() >= limit {
                break;
            }
            let (key, _) = entry.map_err(io)?;
            let name = key.value();
            if !username_matches(name, query) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            names.push(name.to_string());
        }
        Ok(names)
    }
}

fn encode(value: &impl Serialize) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Usernames cannot contain NUL, so the separator keeps one user's rows from
/// sharing a prefix with a longer username.
fn recipient_prefix(recipient: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(recipient.len() + 1);
    prefix.extend_from_slice(recipient.as_bytes());
    prefix.push(0);
    prefix
}

fn sequence_key(prefix: &[u8], sequence: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn decode_sequence(prefix: &[u8], key: &[u8]) -> Option<u64> {
    let tail: [u8; 8] = key.strip_prefix(prefix)?.try_into().ok()?;
    Some(u64::from_be_bytes(tail))
}

fn next_sequence(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    prefix: &[u8],
) -> Result<u64, StorageError> {
    let start = sequence_key(prefix, 0);
    let end = sequence_key(prefix, u64::MAX);

    let mut range = table.range(start.as_slice()..=end.as_slice()).map_err(io)?;
    match range.next_back() {
        Some(entry) => {
            let (key, _) = entry.map_err(io)?;
            let last = decode_sequence(prefix, key.value())
                .ok_or_else(|| StorageError::Serialization("malformed sequence key".to_string()))?;
            Ok(last + 1)
        },
        None => Ok(0),
    }
}

fn load_sequence<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    prefix: &[u8],
) -> Result<Vec<T>, StorageError> {
    let start = sequence_key(prefix, 0);
    let end = sequence_key(prefix, u64::MAX);

    let mut values = Vec::new();
    for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
        let (_, value) = entry.map_err(io)?;
        values.push(decode(value.value())?);
    }
    Ok(values)
}

fn delete_sequence(
    table: &mut redb::Table<'_, &'static [u8], &'static [u8]>,
    prefix: &[u8],
) -> Result<(), StorageError> {
    let start = sequence_key(prefix, 0);
    let end = sequence_key(prefix, u64::MAX);

    let mut keys = Vec::new();
    for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
        let (key, _) = entry.map_err(io)?;
        keys.push(key.value().to_vec());
    }

    for key in keys {
        table.remove(key.as_slice()).map_err(io)?;
    }
    Ok(())
}
