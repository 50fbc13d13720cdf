//! Sealing inbox tokens for their recipient.
//!
//! The relay wraps a freshly drawn token under a key encapsulated to the
//! recipient's KEM key. Only the recipient can unwrap it and present it back.

use quietline_crypto::{
    INBOX_TOKEN_LABEL, KemKeyPair, KemPublicKey, TOKEN_SIZE, derive_subkey, encapsulate, open, seal,
};
use quietline_proto::SealedToken;

use crate::{env::Environment, error::ChatError};

/// Draw a token and seal it for `recipient`.
///
/// Returns the plain token (for hashing) and its sealed form.
///
/// # Errors
///
/// - `BadFormat` if encapsulation against `recipient` fails
pub fn issue_inbox_token<E: Environment>(
    env: &E,
    recipient: &KemPublicKey,
) -> Result<([u8; TOKEN_SIZE], SealedToken), ChatError> {
    let token: [u8; TOKEN_SIZE] = env.random_array();

    let (kem_ciphertext, shared) = encapsulate(recipient, env.random_array())?;
    let wrap = derive_subkey(shared.as_bytes(), INBOX_TOKEN_LABEL);
    let enc_token = seal(&wrap, &token, env.random_array());

    Ok((token, SealedToken { kem_ciphertext, enc_token }))
}

/// Recover a token sealed for `local_kem`.
///
/// # Errors
///
/// - `AuthFailure` if the token was not sealed for this key
/// - `BadFormat` if the KEM ciphertext is malformed
pub fn open_inbox_token(
    sealed: &SealedToken,
    local_kem: &KemKeyPair,
) -> Result<Vec<u8>, ChatError> {
    let shared = local_kem.decapsulate(&sealed.kem_ciphertext)?;
    let wrap = derive_subkey(shared.as_bytes(), INBOX_TOKEN_LABEL);

    open(&wrap, &sealed.enc_token)
        .map_err(|_| ChatError::AuthFailure("inbox token was not sealed for this user".to_string()))
}
