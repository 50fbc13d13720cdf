//! Inbox access tokens
//!
//! The relay hands a recipient a random token the first time it asks to read
//! an inbox and remembers only its SHA-512 hash. Presenting the token later
//! proves the caller is the party who decapsulated it.

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Size of a raw inbox token.
pub const TOKEN_SIZE: usize = 32;

/// Size of a stored token hash.
pub const TOKEN_HASH_SIZE: usize = 64;

/// SHA-512 hash of a token, the only form the relay persists.
pub fn hash_token(token: &[u8]) -> [u8; TOKEN_HASH_SIZE] {
    let digest = Sha512::digest(token);

    let mut out = [0u8; TOKEN_HASH_SIZE];
    out.copy_from_slice(&digest);
    out
}

/// Check a presented token against a stored hash.
///
/// The hash comparison is constant time.
pub fn token_matches(token: &[u8], stored_hash: &[u8]) -> bool {
    if stored_hash.len() != TOKEN_HASH_SIZE {
        return false;
    }

    let presented = hash_token(token);
    presented[..].ct_eq(stored_hash).into()
}
