//! End-to-end encrypted chat events.
//!
//! An [`Event`] is what a chat participant actually says. It is CBOR-encoded
//! and sealed under the chat key before it becomes the `ciphertext` of a
//! `Send` or `Deliver` frame.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// A single entry in a chat's event log.
///
/// # Invariants
///
/// - `serial` equals the wire serial of the frame that carried it. Receivers
///   reject events where the two disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Sender wall clock (Unix seconds)
    pub timestamp: u64,
    /// Chat serial this event was sealed at
    pub serial: u64,
    /// Sender username
    pub sender: String,
    /// Event content
    pub payload: EventPayload,
}

/// Event content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    /// User text
    Message {
        /// Message body
        text: String,
    },
    /// Fresh key material; the chat key after this event is the secret
    /// encapsulated in `kem_ciphertext`
    KeyRotation {
        /// ML-KEM ciphertext
        kem_ciphertext: Vec<u8>,
    },
}

impl Event {
    /// Whether this event re-keys the chat.
    pub fn is_key_rotation(&self) -> bool {
        matches!(self.payload, EventPayload::KeyRotation { .. })
    }

    /// CBOR encoding of the event.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Parse an event from CBOR.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the bytes are not a valid event
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trip() {
        let event = Event {
            timestamp: 1_700_000_000,
            serial: 5,
            sender: "alice".to_string(),
            payload: EventPayload::Message { text: "hi".to_string() },
        };

        let bytes = event.to_cbor().unwrap();
        assert_eq!(Event::from_cbor(&bytes).unwrap(), event);
        assert!(!event.is_key_rotation());
    }

    #[test]
    fn key_rotation_is_flagged() {
        let event = Event {
            timestamp: 0,
            serial: 20,
            sender: "bob".to_string(),
            payload: EventPayload::KeyRotation { kem_ciphertext: vec![0xAA; 8] },
        };

        assert!(event.is_key_rotation());
        assert_eq!(Event::from_cbor(&event.to_cbor().unwrap()).unwrap(), event);
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(Event::from_cbor(&[0x01, 0x02]), Err(ProtocolError::CborDecode(_))));
    }
}
