//! Quietline wire protocol
//!
//! Everything two quietline endpoints agree on byte-for-byte: the
//! length-prefixed frame, the opcode table, the CBOR payloads carried inside
//! frames, and the event structure that is encrypted end to end.
//!
//! ```text
//! ┌──────────────┬────────┬──────────────────────┐
//! │ length (u32) │ opcode │ CBOR payload         │
//! │ big-endian   │ u8     │ (no variant tag)     │
//! └──────────────┴────────┴──────────────────────┘
//!                └──────── length bytes ─────────┘
//! ```
//!
//! The relay only ever sees `Send`/`Deliver` ciphertext. [`Event`] values are
//! serialized and sealed by the client before they reach a frame.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod event;
pub mod frame;
pub mod ids;
pub mod opcodes;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use event::{Event, EventPayload};
pub use frame::Frame;
pub use ids::{INBOX_ID_SIZE, InboxId};
pub use opcodes::Opcode;
pub use payloads::{
    ErrorPayload, Payload,
    chat::{Deliver, SendMessage},
    relay::{ChatNotification, SealedToken, StoredMessage},
    session::PublicIdentity,
};

/// ALPN protocol identifier for QUIC connections.
pub const ALPN_PROTOCOL: &[u8] = b"quietline";
