//! Live messaging payloads.
//!
//! [`SendMessage`] travels client to server, `Deliver` server to client. The relay
//! never sees inside `ciphertext`.

use serde::{Deserialize, Serialize};

use crate::InboxId;

/// Ciphertext addressed to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Chat serial the event was sealed at
    pub serial: u64,
    /// Recipient username
    pub receiver: String,
    /// Chat inbox
    pub inbox_id: InboxId,
    /// Sealed event (`nonce || ciphertext || tag`)
    pub ciphertext: Vec<u8>,
}

/// Ciphertext forwarded to a live recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliver {
    /// Chat serial the event was sealed at
    pub serial: u64,
    /// Chat inbox
    pub inbox_id: InboxId,
    /// Sealed event
    pub ciphertext: Vec<u8>,
}

impl From<SendMessage> for Deliver {
    fn from(send: SendMessage) -> Self {
        Self { serial: send.serial, inbox_id: send.inbox_id, ciphertext: send.ciphertext }
    }
}
