//! Quietline protocol core
//!
//! Client-side chat state and the pure operations on it: the rotation
//! schedule, session commits, event encryption and first-contact invites. No
//! I/O happens here; the client engine drives these types against a live
//! stream and the relay.
//!
//! # Message Flow
//!
//! ```text
//! encrypt_message ──► Send ──► relay ──► Deliver ──► decrypt ──► commit_received
//!        │                                                          │
//!        └──────────────────────── commit_sent ◄── (on the wire)    ▼
//!                                                          RotationScheduler
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod env;
pub mod error;
pub mod identity;
pub mod inbox_token;
pub mod invite;
pub mod rotation;
pub mod session;
pub mod system_env;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use codec::{Decrypted, Outgoing, decrypt, encrypt_key_rotation, encrypt_message};
pub use env::Environment;
pub use error::ChatError;
pub use identity::{LOGIN_CONTEXT, LocalIdentity, PeerIdentity, login_transcript};
pub use inbox_token::{issue_inbox_token, open_inbox_token};
pub use invite::{Invite, OpenedInvite, open_invite, seal_invite};
pub use rotation::{ROTATION_INTERVAL, RotationInput, RotationScheduler};
pub use session::{ChatSession, SessionState};
pub use system_env::SystemEnv;
