//! Event encryption and decryption.
//!
//! Turns a plaintext [`Event`] into the `ciphertext` of a `Send` frame and
//! back. Nothing here mutates a [`ChatSession`]: the caller commits the result
//! only once the frame is on the wire (send) or the event is authenticated
//! (receive).

use quietline_crypto::{
    ChatKey, KemPublicKey, MAX_SKIP, advance, advance_by, encapsulate, open, seal,
};
use quietline_proto::{Deliver, Event, EventPayload, SendMessage};

use crate::{env::Environment, error::ChatError, session::ChatSession};

/// A sealed event ready to send, plus what the session becomes afterwards.
#[derive(Debug)]
pub struct Outgoing {
    /// Wire payload
    pub send: SendMessage,
    /// Plaintext event for the local log
    pub event: Event,
    /// Key for the serial after this event
    pub next_key: ChatKey,
}

/// A decrypted incoming event and the serial whose key opened it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    /// Authenticated event
    pub event: Event,
    /// Serial the event was sealed at
    pub used_serial: u64,
}

/// Seal a text message at the session's current serial.
///
/// # Errors
///
/// - `BadFormat` if the event cannot be encoded
pub fn encrypt_message<E: Environment>(
    env: &E,
    session: &ChatSession,
    text: &str,
) -> Result<Outgoing, ChatError> {
    let event = Event {
        timestamp: env.wall_clock_secs(),
        serial: session.current_serial(),
        sender: session.local_username().to_string(),
        payload: EventPayload::Message { text: text.to_string() },
    };

    let send = seal_event(env, session, &event)?;
    Ok(Outgoing { send, event, next_key: advance(session.key()) })
}

/// Seal a `KeyRotation` carrying a fresh secret for `peer_kem_key`.
///
/// The event itself is sealed under the *current* key; `next_key` is the
/// encapsulated secret.
///
/// # Errors
///
/// - `BadFormat` if the event cannot be encoded or encapsulation fails
pub fn encrypt_key_rotation<E: Environment>(
    env: &E,
    session: &ChatSession,
    peer_kem_key: &KemPublicKey,
) -> Result<Outgoing, ChatError> {
    let (kem_ciphertext, next_key) = encapsulate(peer_kem_key, env.random_array())?;

    let event = Event {
        timestamp: env.wall_clock_secs(),
        serial: session.current_serial(),
        sender: session.local_username().to_string(),
        payload: EventPayload::KeyRotation { kem_ciphertext },
    };

    let send = seal_event(env, session, &event)?;
    Ok(Outgoing { send, event, next_key })
}

fn seal_event<E: Environment>(
    env: &E,
    session: &ChatSession,
    event: &Event,
) -> Result<SendMessage, ChatError> {
    let plaintext = event.to_cbor()?;
    let ciphertext = seal(session.key(), &plaintext, env.random_array());

    Ok(SendMessage {
        serial: event.serial,
        receiver: session.peer().username().to_string(),
        inbox_id: session.inbox_id(),
        ciphertext,
    })
}

/// Decrypt a delivered event against the session's current state.
///
/// - wire serial == current: decrypt with the current key
/// - wire serial ahead: ratchet forward (at most `MAX_SKIP` steps)
/// - wire serial behind: keys for past serials are gone
///
/// # Errors
///
/// - `DesyncOrCorruption` for a stale serial, an oversized skip, a failed tag
///   check, an inner serial that disagrees with the wire, or a sender other
///   than the peer
/// - `BadFormat` if the plaintext is not a valid event
pub fn decrypt(session: &ChatSession, deliver: &Deliver) -> Result<Decrypted, ChatError> {
    if deliver.inbox_id != session.inbox_id() {
        return Err(ChatError::DesyncOrCorruption(format!(
            "frame for inbox {} routed to session {}",
            deliver.inbox_id,
            session.inbox_id()
        )));
    }

    let current = session.current_serial();
    if deliver.serial < current {
        return Err(ChatError::DesyncOrCorruption(format!(
            "stale serial {} (session at {current})",
            deliver.serial
        )));
    }

    let steps = deliver.serial - current;
    if steps > MAX_SKIP {
        return Err(ChatError::DesyncOrCorruption(format!(
            "serial {} is {steps} ahead of session (max {MAX_SKIP})",
            deliver.serial
        )));
    }

    let key = advance_by(session.key(), steps)?;
    let plaintext = open(&key, &deliver.ciphertext)?;
    let event = Event::from_cbor(&plaintext)?;

    if event.serial != deliver.serial {
        return Err(ChatError::DesyncOrCorruption(format!(
            "inner serial {} does not match wire serial {}",
            event.serial, deliver.serial
        )));
    }
    if event.sender != session.peer().username() {
        return Err(ChatError::DesyncOrCorruption(format!(
            "event claims sender {} in chat with {}",
            event.sender,
            session.peer().username()
        )));
    }

    Ok(Decrypted { event, used_serial: deliver.serial })
}

#[cfg(test)]
mod tests {
    use quietline_crypto::IdentityKeys;
    use quietline_proto::InboxId;

    use super::*;
    use crate::{
        identity::{LocalIdentity, PeerIdentity},
        testing::SeededEnv,
    };

    struct Pair {
        alice: ChatSession,
        bob: ChatSession,
        bob_id: LocalIdentity,
    }

    fn pair(start: u64) -> Pair {
        let alice_id = LocalIdentity::new("alice", IdentityKeys::from_seeds([1; 32], [2; 32]));
        let bob_id = LocalIdentity::new("bob", IdentityKeys::from_seeds([3; 32], [4; 32]));
        let k0 = ChatKey::from_bytes([7; 32]);
        let inbox = InboxId([1; 32]);

        let alice = ChatSession::new(
            inbox,
            "alice",
            PeerIdentity::from_public("bob", &bob_id.public()).unwrap(),
            "alice",
            k0.clone(),
            start,
        );
        let bob = ChatSession::new(
            inbox,
            "bob",
            PeerIdentity::from_public("alice", &alice_id.public()).unwrap(),
            "alice",
            k0,
            start,
        );
        Pair { alice, bob, bob_id }
    }

    fn deliver(out: &Outgoing) -> Deliver {
        Deliver::from(out.send.clone())
    }

    #[test]
    fn in_order_round_trip() {
        let env = SeededEnv::new(1);
        let p = pair(0);

        let out = encrypt_message(&env, &p.alice, "hi").unwrap();
        let decrypted = decrypt(&p.bob, &deliver(&out)).unwrap();

        assert_eq!(decrypted.event, out.event);
        assert_eq!(decrypted.used_serial, 0);
        assert_eq!(out.send.receiver, "bob");
    }

    #[test]
    fn encrypt_does_not_mutate() {
        let env = SeededEnv::new(1);
        let p = pair(3);

        let _ = encrypt_message(&env, &p.alice, "hi").unwrap();

        assert_eq!(p.alice.current_serial(), 3);
        assert!(p.alice.events().is_empty());
    }

    #[test]
    fn gap_is_recovered_by_ratcheting() {
        let env = SeededEnv::new(2);
        let mut p = pair(5);

        // Alice sends 5, 6, 7, 8; only 8 reaches Bob
        let mut last = None;
        for text in ["a", "b", "c", "d"] {
            let out = encrypt_message(&env, &p.alice, text).unwrap();
            p.alice.commit_sent(out.event.clone(), out.next_key.clone()).unwrap();
            last = Some(out);
        }
        let Some(out8) = last else { unreachable!("loop ran") };
        assert_eq!(out8.send.serial, 8);

        let decrypted = decrypt(&p.bob, &deliver(&out8)).unwrap();
        assert_eq!(decrypted.used_serial, 8);
        assert_eq!(decrypted.event.payload, EventPayload::Message { text: "d".to_string() });

        // Bob lands where Alice is and his reply opens on her side
        p.bob.commit_received(decrypted, p.bob_id.kem()).unwrap();
        assert_eq!(p.bob.current_serial(), p.alice.current_serial());
        assert_eq!(p.bob.key(), p.alice.key());

        let reply = encrypt_message(&env, &p.bob, "e").unwrap();
        let opened = decrypt(&p.alice, &deliver(&reply)).unwrap();
        assert_eq!(opened.used_serial, 9);
    }

    #[test]
    fn gap_ciphertext_under_wrong_key_fails() {
        let env = SeededEnv::new(2);
        let p = pair(5);

        // Sealed under advance^3(k5) but stamped with serial 5
        let k8 = advance_by(p.alice.key(), 3).unwrap();
        let event = Event {
            timestamp: 0,
            serial: 5,
            sender: "alice".to_string(),
            payload: EventPayload::Message { text: "x".to_string() },
        };
        let forged = Deliver {
            serial: 5,
            inbox_id: p.bob.inbox_id(),
            ciphertext: seal(&k8, &event.to_cbor().unwrap(), env.random_array()),
        };

        assert!(matches!(decrypt(&p.bob, &forged), Err(ChatError::DesyncOrCorruption(_))));
    }

    #[test]
    fn stale_serial_rejected() {
        let env = SeededEnv::new(3);
        let mut p = pair(0);

        let out = encrypt_message(&env, &p.alice, "hi").unwrap();
        let d = deliver(&out);
        let decrypted = decrypt(&p.bob, &d).unwrap();
        p.bob.commit_received(decrypted, p.bob_id.kem()).unwrap();

        // Replay
        assert!(matches!(decrypt(&p.bob, &d), Err(ChatError::DesyncOrCorruption(_))));
    }

    #[test]
    fn skip_beyond_max_rejected() {
        let env = SeededEnv::new(4);
        let p = pair(0);

        let mut d = deliver(&encrypt_message(&env, &p.alice, "hi").unwrap());
        d.serial = MAX_SKIP + 1;

        assert!(matches!(decrypt(&p.bob, &d), Err(ChatError::DesyncOrCorruption(_))));
    }

    #[test]
    fn wire_serial_must_match_inner_serial() {
        let env = SeededEnv::new(5);
        let p = pair(0);

        // Inner event says 0, sealed under k(1), wire says 1
        let k1 = advance(p.alice.key());
        let event = Event {
            timestamp: 0,
            serial: 0,
            sender: "alice".to_string(),
            payload: EventPayload::Message { text: "x".to_string() },
        };
        let d = Deliver {
            serial: 1,
            inbox_id: p.bob.inbox_id(),
            ciphertext: seal(&k1, &event.to_cbor().unwrap(), env.random_array()),
        };

        assert!(matches!(decrypt(&p.bob, &d), Err(ChatError::DesyncOrCorruption(_))));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let env = SeededEnv::new(6);
        let p = pair(0);

        let mut d = deliver(&encrypt_message(&env, &p.alice, "hi").unwrap());
        let last = d.ciphertext.len() - 1;
        d.ciphertext[last] ^= 0x80;

        assert!(matches!(decrypt(&p.bob, &d), Err(ChatError::DesyncOrCorruption(_))));
    }

    #[test]
    fn rotation_key_reaches_peer() {
        let env = SeededEnv::new(7);
        let mut p = pair(0);

        let out =
            encrypt_key_rotation(&env, &p.alice, p.alice.peer().kem_key()).unwrap();
        let decrypted = decrypt(&p.bob, &deliver(&out)).unwrap();
        p.bob.commit_received(decrypted, p.bob_id.kem()).unwrap();

        assert_eq!(p.bob.current_serial(), 1);
        assert_eq!(p.bob.key(), &out.next_key);
        assert_ne!(&out.next_key, &advance(p.alice.key()), "rotation breaks the hash chain");
    }

    #[test]
    fn rotation_key_not_recoverable_by_others() {
        let env = SeededEnv::new(8);
        let p = pair(0);
        let mallory = IdentityKeys::from_seeds([9; 32], [9; 32]);

        let out =
            encrypt_key_rotation(&env, &p.alice, p.alice.peer().kem_key()).unwrap();
        let EventPayload::KeyRotation { kem_ciphertext } = &out.event.payload else {
            unreachable!("rotation event")
        };

        assert_ne!(mallory.kem().decapsulate(kem_ciphertext).unwrap(), out.next_key);
    }
}
