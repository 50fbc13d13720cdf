//! Subkey derivation using HKDF-SHA256
//!
//! Chat keys and KEM shared secrets are never used for more than one purpose.
//! Anything that is not an event payload gets its own subkey under a distinct
//! label.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::ratchet::{ChatKey, KEY_SIZE};

/// Label for the key that seals the first-contact notification.
pub const NOTIFICATION_LABEL: &[u8] = b"quietlineNotifyV1";

/// Label for the key that seals an issued inbox token.
pub const INBOX_TOKEN_LABEL: &[u8] = b"quietlineInboxTokenV1";

/// Derive a 32-byte subkey from `secret` bound to `label`.
///
/// Deterministic: same inputs always produce the same subkey. Different labels
/// produce unrelated keys.
pub fn derive_subkey(secret: &[u8], label: &[u8]) -> ChatKey {
    let hkdf = Hkdf::<Sha256>::new(None, secret);

    let mut okm = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(label, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    ChatKey::from_bytes(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let secret = b"test_shared_secret_material_here";

        let a = derive_subkey(secret, NOTIFICATION_LABEL);
        let b = derive_subkey(secret, NOTIFICATION_LABEL);

        assert_eq!(a, b, "same inputs must produce same output");
    }

    #[test]
    fn labels_produce_different_keys() {
        let secret = [0x11u8; 32];

        let notify = derive_subkey(&secret, NOTIFICATION_LABEL);
        let token = derive_subkey(&secret, INBOX_TOKEN_LABEL);

        assert_ne!(notify, token, "labels must isolate subkeys");
    }

    #[test]
    fn secrets_produce_different_keys() {
        let a = derive_subkey(&[1u8; 32], NOTIFICATION_LABEL);
        let b = derive_subkey(&[2u8; 32], NOTIFICATION_LABEL);

        assert_ne!(a, b);
    }

    #[test]
    fn subkey_differs_from_secret() {
        let secret = [0x33u8; 32];
        let subkey = derive_subkey(&secret, INBOX_TOKEN_LABEL);

        assert_ne!(subkey.as_bytes(), &secret);
    }
}
