//! Authenticated encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure: the 24-byte nonce is supplied by the caller, which
//! draws it from its environment's RNG. Sealed output is `nonce || ciphertext`
//! so a blob carries everything needed to open it except the key.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CryptoError, ratchet::ChatKey};

/// `XChaCha20` nonce size (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key` and prepend the nonce.
///
/// # Security
///
/// - Caller MUST provide a fresh random nonce per key in production; a 24-byte
///   random nonce makes collisions negligible
/// - Authenticated encryption prevents tampering
pub fn seal(key: &ChatKey, plaintext: &[u8], nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    sealed
}

/// Decrypt a blob produced by [`seal`].
///
/// # Errors
///
/// - `DecryptionFailed`: blob shorter than nonce plus tag, or the
///   authentication tag does not match (wrong key or tampering)
pub fn open(key: &ChatKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed {
            reason: format!(
                "sealed blob too short: {} bytes, need at least {}",
                sealed.len(),
                NONCE_SIZE + TAG_SIZE
            ),
        });
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}
