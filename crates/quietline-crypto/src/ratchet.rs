//! Hash ratchet for per-message chat keys
//!
//! # Security Properties
//!
//! - Forward Secrecy: `advance` is a one-way hash, no earlier key can be
//!   recovered from a later one
//! - Determinism: the same starting key always yields the same chain, which is
//!   the only property both parties rely on to stay in sync
//! - Bounded Work: `advance_by` refuses to skip more than [`MAX_SKIP`] steps, so
//!   an attacker-chosen serial cannot force unbounded hashing

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of a chat key in bytes.
pub const KEY_SIZE: usize = 32;

/// Maximum number of ratchet steps a single receive may skip.
pub const MAX_SKIP: u64 = 1000;

/// Symmetric chat key.
///
/// Used directly as the XChaCha20-Poly1305 key for the event at the serial it
/// belongs to. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct ChatKey([u8; KEY_SIZE]);

impl ChatKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for ChatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChatKey(..)")
    }
}

impl Drop for ChatKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Advance the ratchet by one step: `SHA-256(key)`.
pub fn advance(key: &ChatKey) -> ChatKey {
    let digest = Sha256::digest(key.as_bytes());

    let mut next = [0u8; KEY_SIZE];
    next.copy_from_slice(&digest);
    ChatKey(next)
}

/// Advance the ratchet `steps` times.
///
/// Used to derive the key for a message that arrived ahead of the expected
/// serial. Zero steps returns a copy of `key`.
///
/// # Errors
///
/// - `SkipTooLarge` if `steps > MAX_SKIP`
pub fn advance_by(key: &ChatKey, steps: u64) -> Result<ChatKey, CryptoError> {
    if steps > MAX_SKIP {
        return Err(CryptoError::SkipTooLarge { steps, max: MAX_SKIP });
    }

    // Intermediate keys are dropped (and zeroized) as the loop moves on
    let mut current = key.clone();
    for _ in 0..steps {
        current = advance(&current);
    }

    Ok(current)
}
