//! Per-peer chat session state.
//!
//! A session pairs the current ratchet key with the serial it belongs to. The
//! two only ever change together, through [`ChatSession::commit_sent`] or
//! [`ChatSession::commit_received`], and each commit computes every new value
//! before writing any field.
//!
//! # State
//!
//! ```text
//!   send/receive Message at used        receive KeyRotation / send KeyRotation
//!   (serial, k) -> (used+1, H(k_used))  (serial, k) -> (used+1, decapsulated)
//! ```
//!
//! A `Message` that arrives ahead of the expected serial moves the session to
//! the position it was sealed at. Messages it skipped over become stale and
//! are rejected if they show up later; both sides stay on the same chain.

use quietline_crypto::{ChatKey, KemKeyPair, advance, advance_by};
use quietline_proto::{Event, EventPayload, InboxId, PublicIdentity};

use crate::{
    codec::Decrypted,
    error::ChatError,
    identity::PeerIdentity,
    rotation::{RotationInput, RotationScheduler},
};

/// Every field of a [`ChatSession`], for keeping it across restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Shared inbox
    pub inbox_id: InboxId,
    /// Local username
    pub local_username: String,
    /// Peer username
    pub peer_username: String,
    /// Peer identity as published
    pub peer_identity: PublicIdentity,
    /// Username that started the chat
    pub initiator: String,
    /// Key for the event at `current_serial`
    pub key: ChatKey,
    /// First serial of the chat
    pub serial_start: u64,
    /// Serial of the next event
    pub current_serial: u64,
    /// Serial of the latest key rotation
    pub last_rotation_serial: Option<u64>,
    /// Locally known events in commit order
    pub events: Vec<Event>,
}

/// State for one chat with one peer.
///
/// # Invariants
///
/// - `current_serial >= serial_start`
/// - `key` encrypts and decrypts the event at `current_serial`
/// - Never rolled back: failed operations leave the session untouched
#[derive(Debug)]
pub struct ChatSession {
    inbox_id: InboxId,
    local_username: String,
    peer: PeerIdentity,
    initiator: String,
    key: ChatKey,
    serial_start: u64,
    current_serial: u64,
    last_rotation_serial: Option<u64>,
    events: Vec<Event>,
}

impl ChatSession {
    /// Create a session at its starting serial.
    pub fn new(
        inbox_id: InboxId,
        local_username: impl Into<String>,
        peer: PeerIdentity,
        initiator: impl Into<String>,
        starting_key: ChatKey,
        serial_start: u64,
    ) -> Self {
        Self {
            inbox_id,
            local_username: local_username.into(),
            peer,
            initiator: initiator.into(),
            key: starting_key,
            serial_start,
            current_serial: serial_start,
            last_rotation_serial: None,
            events: Vec::new(),
        }
    }

    /// Rebuild a session saved with [`Self::state`].
    ///
    /// # Errors
    ///
    /// - `BadFormat` if the peer identity is malformed or the serials are
    ///   inconsistent
    pub fn restore(state: SessionState) -> Result<Self, ChatError> {
        if state.current_serial < state.serial_start {
            return Err(ChatError::BadFormat(format!(
                "current serial {} precedes start {}",
                state.current_serial, state.serial_start
            )));
        }
        if state
            .last_rotation_serial
            .is_some_and(|serial| serial < state.serial_start || serial >= state.current_serial)
        {
            return Err(ChatError::BadFormat("rotation serial outside the chat".to_string()));
        }
        let peer = PeerIdentity::from_public(state.peer_username, &state.peer_identity)?;

        Ok(Self {
            inbox_id: state.inbox_id,
            local_username: state.local_username,
            peer,
            initiator: state.initiator,
            key: state.key,
            serial_start: state.serial_start,
            current_serial: state.current_serial,
            last_rotation_serial: state.last_rotation_serial,
            events: state.events,
        })
    }

    /// Snapshot of every field, for [`Self::restore`].
    pub fn state(&self) -> SessionState {
        SessionState {
            inbox_id: self.inbox_id,
            local_username: self.local_username.clone(),
            peer_username: self.peer.username().to_string(),
            peer_identity: self.peer.public(),
            initiator: self.initiator.clone(),
            key: self.key.clone(),
            serial_start: self.serial_start,
            current_serial: self.current_serial,
            last_rotation_serial: self.last_rotation_serial,
            events: self.events.clone(),
        }
    }

    /// Shared inbox.
    pub fn inbox_id(&self) -> InboxId {
        self.inbox_id
    }

    /// Local username.
    pub fn local_username(&self) -> &str {
        &self.local_username
    }

    /// The other participant.
    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Username of the party that created the chat.
    pub fn initiator(&self) -> &str {
        &self.initiator
    }

    /// Whether the local party created the chat.
    pub fn is_initiator(&self) -> bool {
        self.initiator == self.local_username
    }

    /// Current ratchet key.
    pub fn key(&self) -> &ChatKey {
        &self.key
    }

    /// Serial the chat began at.
    pub fn serial_start(&self) -> u64 {
        self.serial_start
    }

    /// Serial of the next in-order event.
    pub fn current_serial(&self) -> u64 {
        self.current_serial
    }

    /// Serial of the latest `KeyRotation`, if any.
    pub fn last_rotation_serial(&self) -> Option<u64> {
        self.last_rotation_serial
    }

    /// Locally known events in commit order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Whether the next outgoing event must be a `KeyRotation`.
    pub fn needs_rotation(&self, scheduler: &RotationScheduler) -> bool {
        scheduler.should_rotate(&RotationInput {
            current_serial: self.current_serial,
            serial_start: self.serial_start,
            is_initiator: self.is_initiator(),
            last_rotation_serial: self.last_rotation_serial,
        })
    }

    /// Record an event this party sent.
    ///
    /// `next_key` is the key for `event.serial + 1`: the ratcheted key for a
    /// `Message`, the freshly encapsulated secret for a `KeyRotation`.
    ///
    /// # Errors
    ///
    /// - `DesyncOrCorruption` if the event was not sealed at `current_serial`
    pub fn commit_sent(&mut self, event: Event, next_key: ChatKey) -> Result<(), ChatError> {
        if event.serial != self.current_serial {
            return Err(ChatError::DesyncOrCorruption(format!(
                "sent event at serial {} but session is at {}",
                event.serial, self.current_serial
            )));
        }

        let next_serial = self.current_serial + 1;
        let last_rotation =
            if event.is_key_rotation() { Some(event.serial) } else { self.last_rotation_serial };

        self.key = next_key;
        self.current_serial = next_serial;
        self.last_rotation_serial = last_rotation;
        self.events.push(event);

        Ok(())
    }

    /// Adopt a successfully decrypted event.
    ///
    /// - `KeyRotation`: key becomes the decapsulated secret, serial becomes
    ///   `used_serial + 1`
    /// - `Message`: adopt the key derived for `used_serial`, ratchet once
    ///   past it, serial becomes `used_serial + 1`
    ///
    /// # Errors
    ///
    /// - `DesyncOrCorruption` if `used_serial` is behind the session or
    ///   further ahead than the ratchet may skip
    /// - `BadFormat` if the rotation ciphertext has the wrong length
    pub fn commit_received(
        &mut self,
        decrypted: Decrypted,
        local_kem: &KemKeyPair,
    ) -> Result<(), ChatError> {
        let Decrypted { event, used_serial } = decrypted;

        if used_serial < self.current_serial {
            return Err(ChatError::DesyncOrCorruption(format!(
                "received serial {used_serial} but session is at {}",
                self.current_serial
            )));
        }

        let (next_key, next_serial, last_rotation) = match &event.payload {
            EventPayload::KeyRotation { kem_ciphertext } => {
                let key = local_kem.decapsulate(kem_ciphertext)?;
                (key, used_serial + 1, Some(used_serial))
            },
            EventPayload::Message { .. } => {
                let skipped = used_serial - self.current_serial;
                if skipped > 0 {
                    tracing::debug!(
                        inbox = %self.inbox_id,
                        expected = self.current_serial,
                        used = used_serial,
                        "message ahead of session, skipping forward"
                    );
                }
                let used_key = advance_by(&self.key, skipped)?;
                (advance(&used_key), used_serial + 1, self.last_rotation_serial)
            },
        };

        self.key = next_key;
        self.current_serial = next_serial;
        self.last_rotation_serial = last_rotation;
        self.events.push(event);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use quietline_crypto::{IdentityKeys, encapsulate};

    use super::*;
    use crate::identity::LocalIdentity;

    fn peer(name: &str, seed: u8) -> (LocalIdentity, PeerIdentity) {
        let local = LocalIdentity::new(name, IdentityKeys::from_seeds([seed; 32], [seed; 32]));
        let peer = PeerIdentity::from_public(name, &local.public()).unwrap();
        (local, peer)
    }

    fn message(serial: u64, sender: &str) -> Event {
        Event {
            timestamp: 0,
            serial,
            sender: sender.to_string(),
            payload: EventPayload::Message { text: format!("m{serial}") },
        }
    }

    fn session(start: u64) -> (ChatSession, LocalIdentity) {
        let (alice, _) = peer("alice", 1);
        let (_, bob) = peer("bob", 2);
        let s = ChatSession::new(
            InboxId([9; 32]),
            "alice",
            bob,
            "alice",
            ChatKey::from_bytes([5; 32]),
            start,
        );
        (s, alice)
    }

    #[test]
    fn restored_session_continues_the_chain() {
        let (mut s, _) = session(100);
        let next = advance(s.key());
        s.commit_sent(message(100, "alice"), next).unwrap();

        let mut restored = ChatSession::restore(s.state()).unwrap();
        assert_eq!(restored.state(), s.state());
        assert_eq!(restored.peer().username(), "bob");

        // ORACLE: both copies accept the same next commit identically
        let next = advance(s.key());
        s.commit_sent(message(101, "alice"), next.clone()).unwrap();
        restored.commit_sent(message(101, "alice"), next).unwrap();
        assert_eq!(restored.state(), s.state());
    }

    #[test]
    fn restore_rejects_inconsistent_serials() {
        let (s, _) = session(100);

        let mut behind = s.state();
        behind.current_serial = 99;
        assert!(matches!(ChatSession::restore(behind), Err(ChatError::BadFormat(_))));

        let mut rotation = s.state();
        rotation.last_rotation_serial = Some(100);
        assert!(matches!(ChatSession::restore(rotation), Err(ChatError::BadFormat(_))));

        let mut identity = s.state();
        identity.peer_identity.kem_key.truncate(3);
        assert!(matches!(ChatSession::restore(identity), Err(ChatError::BadFormat(_))));
    }

    #[test]
    fn new_session_starts_at_serial_start() {
        let (s, _) = session(100);

        assert_eq!(s.current_serial(), 100);
        assert_eq!(s.serial_start(), 100);
        assert!(s.is_initiator());
        assert!(s.events().is_empty());
    }

    #[test]
    fn commit_sent_message_ratchets() {
        let (mut s, _) = session(0);
        let k0 = s.key().clone();

        s.commit_sent(message(0, "alice"), advance(&k0)).unwrap();

        assert_eq!(s.current_serial(), 1);
        assert_eq!(s.key(), &advance(&k0));
        assert_eq!(s.events().len(), 1);
    }

    #[test]
    fn commit_sent_wrong_serial_rejected() {
        let (mut s, _) = session(0);
        let k0 = s.key().clone();

        let result = s.commit_sent(message(3, "alice"), advance(&k0));

        assert!(matches!(result, Err(ChatError::DesyncOrCorruption(_))));
        assert_eq!(s.current_serial(), 0);
        assert_eq!(s.key(), &k0);
    }

    #[test]
    fn commit_received_in_order() {
        let (mut s, alice) = session(0);
        let k0 = s.key().clone();

        s.commit_received(Decrypted { event: message(0, "bob"), used_serial: 0 }, alice.kem())
            .unwrap();

        assert_eq!(s.current_serial(), 1);
        assert_eq!(s.key(), &advance(&k0));
    }

    #[test]
    fn commit_received_ahead_adopts_derived_position() {
        let (mut s, alice) = session(5);
        let k5 = s.key().clone();

        s.commit_received(Decrypted { event: message(8, "bob"), used_serial: 8 }, alice.kem())
            .unwrap();

        // ORACLE: the sender is at (9, H(k8)) after sealing serial 8
        assert_eq!(s.current_serial(), 9);
        assert_eq!(s.key(), &advance(&advance_by(&k5, 3).unwrap()));
        assert_eq!(s.events().len(), 1);
    }

    #[test]
    fn swapped_delivery_stays_on_senders_chain() {
        let (mut s, alice) = session(5);
        let k5 = s.key().clone();

        // 6 arrives before 5
        s.commit_received(Decrypted { event: message(6, "bob"), used_serial: 6 }, alice.kem())
            .unwrap();
        let late =
            s.commit_received(Decrypted { event: message(5, "bob"), used_serial: 5 }, alice.kem());
        assert!(matches!(late, Err(ChatError::DesyncOrCorruption(_))));

        s.commit_received(Decrypted { event: message(7, "bob"), used_serial: 7 }, alice.kem())
            .unwrap();

        assert_eq!(s.current_serial(), 8);
        assert_eq!(s.key(), &advance_by(&k5, 3).unwrap());
    }

    #[test]
    fn commit_received_beyond_max_skip_rejected() {
        let (mut s, alice) = session(0);
        let far = quietline_crypto::MAX_SKIP + 1;

        let result = s.commit_received(
            Decrypted { event: message(far, "bob"), used_serial: far },
            alice.kem(),
        );

        assert!(matches!(result, Err(ChatError::DesyncOrCorruption(_))));
        assert_eq!(s.current_serial(), 0);
        assert!(s.events().is_empty());
    }

    #[test]
    fn commit_received_stale_rejected() {
        let (mut s, alice) = session(5);

        let result =
            s.commit_received(Decrypted { event: message(4, "bob"), used_serial: 4 }, alice.kem());

        assert!(matches!(result, Err(ChatError::DesyncOrCorruption(_))));
        assert!(s.events().is_empty());
    }

    #[test]
    fn commit_received_rotation_adopts_decapsulated_key() {
        let (mut s, alice) = session(10);
        let (ct, shared) = encapsulate(alice.kem().public_key(), [3; 32]).unwrap();

        let rotation = Event {
            timestamp: 0,
            serial: 12,
            sender: "bob".to_string(),
            payload: EventPayload::KeyRotation { kem_ciphertext: ct },
        };
        s.commit_received(Decrypted { event: rotation, used_serial: 12 }, alice.kem()).unwrap();

        assert_eq!(s.current_serial(), 13);
        assert_eq!(s.key(), &shared);
        assert_eq!(s.last_rotation_serial(), Some(12));
    }

    #[test]
    fn malformed_rotation_leaves_session_untouched() {
        let (mut s, alice) = session(0);
        let k0 = s.key().clone();

        let rotation = Event {
            timestamp: 0,
            serial: 0,
            sender: "bob".to_string(),
            payload: EventPayload::KeyRotation { kem_ciphertext: vec![1, 2, 3] },
        };
        let result = s.commit_received(Decrypted { event: rotation, used_serial: 0 }, alice.kem());

        assert!(matches!(result, Err(ChatError::BadFormat(_))));
        assert_eq!(s.current_serial(), 0);
        assert_eq!(s.key(), &k0);
        assert!(s.events().is_empty());
    }

    #[test]
    fn needs_rotation_on_turn() {
        let (mut s, _) = session(0);
        let scheduler = RotationScheduler::default();

        for serial in 0..20 {
            assert!(!s.needs_rotation(&scheduler), "serial {serial}");
            let next = advance(s.key());
            s.commit_sent(message(serial, "alice"), next).unwrap();
            // Responder turn at 10 is missed, so 11.. become overdue
            if serial == 10 {
                break;
            }
        }

        assert_eq!(s.current_serial(), 11);
        assert!(s.needs_rotation(&scheduler));
    }
}
