//! Property tests for two sessions driven through a whole conversation
//!
//! Both sides run the real codec and rotation schedule. The main harness
//! delivers every frame in order, so the two sessions must agree on
//! `(serial, key)` after every step no matter who talks when. A second
//! property shuffles and drops a burst of messages and checks the sides meet
//! again on the next exchange.

use proptest::prelude::*;
use quietline_core::{
    ChatError, ChatSession, Decrypted, LocalIdentity, Outgoing, PeerIdentity, RotationScheduler,
    decrypt, encrypt_key_rotation, encrypt_message, testing::SeededEnv,
};
use quietline_crypto::{ChatKey, IdentityKeys, advance};
use quietline_proto::{Deliver, InboxId};

struct Side {
    identity: LocalIdentity,
    session: ChatSession,
}

fn setup(serial_start: u64) -> (Side, Side) {
    let alice = LocalIdentity::new("alice", IdentityKeys::from_seeds([1; 32], [2; 32]));
    let bob = LocalIdentity::new("bob", IdentityKeys::from_seeds([3; 32], [4; 32]));
    let k0 = ChatKey::from_bytes([0x42; 32]);
    let inbox = InboxId([0x11; 32]);

    let alice_session = ChatSession::new(
        inbox,
        "alice",
        PeerIdentity::from_public("bob", &bob.public()).unwrap(),
        "alice",
        k0.clone(),
        serial_start,
    );
    let bob_session = ChatSession::new(
        inbox,
        "bob",
        PeerIdentity::from_public("alice", &alice.public()).unwrap(),
        "alice",
        k0,
        serial_start,
    );

    (Side { identity: alice, session: alice_session }, Side { identity: bob, session: bob_session })
}

/// Send `text` from `from` to `to`, then every rotation the schedule asks for.
fn exchange(env: &SeededEnv, from: &mut Side, to: &mut Side, text: &str) {
    let scheduler = RotationScheduler::default();

    let out = encrypt_message(env, &from.session, text).unwrap();
    deliver(from, to, out);

    // The receiver checks first: it committed last
    loop {
        if to.session.needs_rotation(&scheduler) {
            rotate(env, to, from);
        } else if from.session.needs_rotation(&scheduler) {
            rotate(env, from, to);
        } else {
            break;
        }
    }
}

fn rotate(env: &SeededEnv, from: &mut Side, to: &mut Side) {
    let peer_kem = from.session.peer().kem_key().clone();
    let out = encrypt_key_rotation(env, &from.session, &peer_kem).unwrap();
    deliver(from, to, out);
}

fn deliver(from: &mut Side, to: &mut Side, out: Outgoing) {
    let wire = Deliver::from(out.send.clone());
    from.session.commit_sent(out.event, out.next_key).unwrap();

    let decrypted: Decrypted = decrypt(&to.session, &wire).unwrap();
    to.session.commit_received(decrypted, to.identity.kem()).unwrap();
}

#[test]
fn prop_sessions_converge() {
    proptest!(|(
        start in 0u64..(1 << 48),
        turns in prop::collection::vec(any::<bool>(), 1..60),
        seed in any::<u64>(),
    )| {
        let env = SeededEnv::new(seed);
        let (mut alice, mut bob) = setup(start);

        for (i, alice_talks) in turns.into_iter().enumerate() {
            let text = format!("message {i}");
            if alice_talks {
                exchange(&env, &mut alice, &mut bob, &text);
            } else {
                exchange(&env, &mut bob, &mut alice, &text);
            }

            // PROPERTY: in-order delivery keeps both sides in lockstep
            prop_assert_eq!(alice.session.current_serial(), bob.session.current_serial());
            prop_assert_eq!(alice.session.key(), bob.session.key());
            prop_assert_eq!(alice.session.events(), bob.session.events());
        }
    });
}

#[test]
fn prop_reordered_and_lost_messages_recover() {
    proptest!(|(
        start in 0u64..(1 << 48),
        shuffle in prop::collection::vec(any::<u32>(), 1..12),
        lost in prop::collection::vec(any::<bool>(), 12),
        seed in any::<u64>(),
    )| {
        let env = SeededEnv::new(seed);
        let (mut alice, mut bob) = setup(start);

        let mut frames = Vec::new();
        for i in 0..shuffle.len() {
            let out = encrypt_message(&env, &alice.session, &format!("burst {i}")).unwrap();
            frames.push(Deliver::from(out.send.clone()));
            alice.session.commit_sent(out.event, out.next_key).unwrap();
        }

        let mut order: Vec<usize> = (0..frames.len()).collect();
        order.sort_by_key(|&i| shuffle[i]);

        for i in order {
            if lost[i] {
                continue;
            }

            let serial_before = bob.session.current_serial();
            let key_before = bob.session.key().clone();
            match decrypt(&bob.session, &frames[i]) {
                Ok(decrypted) => {
                    bob.session.commit_received(decrypted, bob.identity.kem()).unwrap();
                },
                Err(error) => {
                    // PROPERTY: only frames the session already moved past are
                    // refused, and refusing them changes nothing
                    prop_assert!(matches!(error, ChatError::DesyncOrCorruption(_)));
                    prop_assert!(frames[i].serial < serial_before);
                    prop_assert_eq!(bob.session.current_serial(), serial_before);
                    prop_assert_eq!(bob.session.key(), &key_before);
                },
            }

            prop_assert!(bob.session.current_serial() <= alice.session.current_serial());
        }

        exchange(&env, &mut alice, &mut bob, "after the burst");
        exchange(&env, &mut bob, &mut alice, "reply");

        // PROPERTY: one message each way puts both sides on the same chain
        prop_assert_eq!(alice.session.current_serial(), bob.session.current_serial());
        prop_assert_eq!(alice.session.key(), bob.session.key());
    });
}

#[test]
fn prop_rotation_happens_within_interval() {
    proptest!(|(turns in prop::collection::vec(any::<bool>(), 25..80), seed in any::<u64>())| {
        let env = SeededEnv::new(seed);
        let (mut alice, mut bob) = setup(0);

        for alice_talks in turns {
            if alice_talks {
                exchange(&env, &mut alice, &mut bob, "x");
            } else {
                exchange(&env, &mut bob, &mut alice, "x");
            }

            // PROPERTY: the chain is never left un-rotated for a full interval
            let current = alice.session.current_serial();
            let last = alice.session.last_rotation_serial().unwrap_or(0);
            prop_assert!(current - last <= 20, "current {current}, last rotation {last}");
        }
    });
}

#[test]
fn failed_decrypt_leaves_both_sessions_usable() {
    let env = SeededEnv::new(9);
    let (mut alice, mut bob) = setup(0);

    let out = encrypt_message(&env, &alice.session, "hi").unwrap();
    let mut wire = Deliver::from(out.send.clone());
    wire.ciphertext[30] ^= 0xFF;

    // ORACLE: corrupted frame is rejected and bob's session is unchanged
    let before = bob.session.key().clone();
    assert!(matches!(decrypt(&bob.session, &wire), Err(ChatError::DesyncOrCorruption(_))));
    assert_eq!(bob.session.key(), &before);
    assert_eq!(bob.session.current_serial(), 0);

    // The intact frame still opens
    deliver(&mut alice, &mut bob, out);
    assert_eq!(bob.session.key(), &advance(&before));
}
