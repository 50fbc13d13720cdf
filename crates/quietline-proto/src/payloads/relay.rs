//! Relay RPC payloads.
//!
//! Each request travels on its own stream and is answered by exactly one
//! response or an [`ErrorPayload`](super::ErrorPayload).

use serde::{Deserialize, Serialize};

use super::session::PublicIdentity;
use crate::InboxId;

/// Response to `CreateInbox`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxCreated {
    /// Fresh inbox code
    pub inbox_id: InboxId,
}

/// First-contact notification left for a recipient.
///
/// Every field except `recipient` and `kem_ciphertext` is sealed under a key
/// derived from the secret inside `kem_ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyInbox {
    /// Username the notification is for
    pub recipient: String,
    /// Sealed sender username
    pub enc_sender: Vec<u8>,
    /// Sealed inbox code
    pub enc_inbox_code: Vec<u8>,
    /// Sealed Ed25519 signature over the inbox code
    pub enc_signature: Vec<u8>,
    /// Sealed starting serial
    pub enc_serial: Vec<u8>,
    /// ML-KEM ciphertext recovering the starting chat key
    pub kem_ciphertext: Vec<u8>,
}

/// A stored notification as returned to its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatNotification {
    /// Sealed sender username
    pub enc_sender: Vec<u8>,
    /// Sealed inbox code
    pub enc_inbox_code: Vec<u8>,
    /// Sealed signature over the inbox code
    pub enc_signature: Vec<u8>,
    /// Sealed starting serial
    pub enc_serial: Vec<u8>,
    /// ML-KEM ciphertext
    pub kem_ciphertext: Vec<u8>,
}

impl From<NotifyInbox> for ChatNotification {
    fn from(n: NotifyInbox) -> Self {
        Self {
            enc_sender: n.enc_sender,
            enc_inbox_code: n.enc_inbox_code,
            enc_signature: n.enc_signature,
            enc_serial: n.enc_serial,
            kem_ciphertext: n.kem_ciphertext,
        }
    }
}

/// Response to `FetchNewChats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChats {
    /// Notifications in arrival order
    pub chats: Vec<ChatNotification>,
}

/// Request for the sealed token of an inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchToken {
    /// Inbox to read
    pub inbox_id: InboxId,
}

/// Inbox token sealed for its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedToken {
    /// ML-KEM ciphertext recovering the wrapping key
    pub kem_ciphertext: Vec<u8>,
    /// Token sealed under the wrapping key
    pub enc_token: Vec<u8>,
}

/// Response to `FetchToken`. `None` when nothing is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Live token, if any
    pub token: Option<SealedToken>,
}

/// Request for queued ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMessages {
    /// Inbox to drain
    pub inbox_id: InboxId,
    /// Plain token recovered from [`SealedToken`]
    pub token: Vec<u8>,
}

/// One queued ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Chat serial the event was sealed at
    pub serial: u64,
    /// Sealed event
    pub ciphertext: Vec<u8>,
}

/// Response to `FetchMessages`, in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Messages {
    /// Queued messages
    pub messages: Vec<StoredMessage>,
}

/// Request for a user's public identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveUser {
    /// Username to look up
    pub username: String,
}

/// Response to `ResolveUser`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Username
    pub username: String,
    /// Pinned identity
    pub identity: PublicIdentity,
}

/// Paged username search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchUsers {
    /// Case-insensitive substring to match; empty matches everyone
    pub query: String,
    /// Zero-based page index
    pub page: u32,
    /// Page size
    pub size: u32,
}

/// Response to `SearchUsers`, sorted by username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserList {
    /// Matching usernames on the requested page
    pub usernames: Vec<String>,
}
