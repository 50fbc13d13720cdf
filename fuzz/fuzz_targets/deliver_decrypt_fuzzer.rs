//! Fuzz target for the receive path of a chat session
//!
//! Feeds arbitrary `Deliver` frames to `decrypt` against a fixed session.
//!
//! # Invariants
//!
//! - `decrypt` never panics, whatever the serial or ciphertext
//! - A serial behind the session or beyond the skip limit is rejected without
//!   hashing
//! - Nothing but `DesyncOrCorruption` or `BadFormat` comes back for input that
//!   was not produced by the peer

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quietline_core::{ChatError, ChatSession, LocalIdentity, PeerIdentity, decrypt};
use quietline_crypto::{ChatKey, IdentityKeys};
use quietline_proto::{Deliver, InboxId};

const START: u64 = 1_000;

#[derive(Debug, Arbitrary)]
struct Input {
    serial_offset: i16,
    far_ahead: bool,
    ciphertext: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let peer = LocalIdentity::new("alice", IdentityKeys::from_seeds([1; 32], [2; 32]));
    let Ok(peer) = PeerIdentity::from_public("alice", &peer.public()) else {
        return;
    };

    let inbox = InboxId([9; 32]);
    let session =
        ChatSession::new(inbox, "bob", peer, "alice", ChatKey::from_bytes([7; 32]), START);

    let serial = if input.far_ahead {
        u64::MAX - u64::from(input.serial_offset.unsigned_abs())
    } else {
        START.saturating_add_signed(i64::from(input.serial_offset))
    };

    let deliver = Deliver { serial, inbox_id: inbox, ciphertext: input.ciphertext };
    match decrypt(&session, &deliver) {
        Ok(_) => {},
        Err(ChatError::DesyncOrCorruption(_) | ChatError::BadFormat(_)) => {},
        Err(other) => panic!("unexpected error class: {other}"),
    }
});
