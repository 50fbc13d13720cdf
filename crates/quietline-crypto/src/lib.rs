//! Quietline Cryptographic Primitives
//!
//! Cryptographic building blocks for the quietline direct-messaging protocol.
//! Functions are pure: callers provide nonces and RNG seeds so that every
//! operation is reproducible under a seeded test environment.
//!
//! # Key Lifecycle
//!
//! Every chat starts from a secret that the initiator encapsulates against the
//! peer's long-term ML-KEM key. From then on each message advances the chat
//! key by one hash step, and every few messages one side re-seeds the chain
//! with a fresh encapsulation carried inside the encrypted stream.
//!
//! ```text
//! ML-KEM-1024 encapsulation (chat start / rotation)
//!        │
//!        ▼
//! Chat Key k(n)
//!        │ SHA-256
//!        ▼
//! Chat Key k(n+1) ──► XChaCha20-Poly1305 ──► Ciphertext
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Ratchet advancement: `k(n+1) = SHA-256(k(n))`, old keys are zeroized on
//!   drop and cannot be recomputed from newer ones
//! - KEM rotation: a fresh encapsulated secret breaks the hash chain, so a
//!   leaked key stops being useful after the next rotation
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD rejects any tampered ciphertext
//! - Ed25519 signatures bind a new inbox to its creator
//!
//! Relay Blindness:
//! - Inbox tokens are stored only as SHA-512 hashes
//! - The token itself travels sealed under a key only the recipient can
//!   decapsulate

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod derive;
pub mod error;
pub mod identity;
pub mod kem;
pub mod ratchet;
pub mod token;

pub use aead::{NONCE_SIZE, TAG_SIZE, open, seal};
pub use derive::{INBOX_TOKEN_LABEL, NOTIFICATION_LABEL, derive_subkey};
pub use error::CryptoError;
pub use identity::{IdentityKeys, SIGNATURE_SIZE, VERIFYING_KEY_SIZE, verify_signature};
pub use kem::{
    CIPHERTEXT_SIZE as KEM_CIPHERTEXT_SIZE, KemKeyPair, KemPublicKey,
    PUBLIC_KEY_SIZE as KEM_PUBLIC_KEY_SIZE, encapsulate,
};
pub use ratchet::{ChatKey, KEY_SIZE, MAX_SKIP, advance, advance_by};
pub use token::{TOKEN_HASH_SIZE, TOKEN_SIZE, hash_token, token_matches};
