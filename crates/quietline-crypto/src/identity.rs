//! Long-term user identity: an Ed25519 signing key plus an ML-KEM key pair

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::{
    error::CryptoError,
    kem::{KemKeyPair, KemPublicKey},
};

/// Ed25519 verifying key size.
pub const VERIFYING_KEY_SIZE: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// A user's private identity material.
pub struct IdentityKeys {
    signing: SigningKey,
    kem: KemKeyPair,
}

impl IdentityKeys {
    /// Build an identity from two independent 32-byte seeds.
    pub fn from_seeds(signing_seed: [u8; 32], kem_seed: [u8; 32]) -> Self {
        Self { signing: SigningKey::from_bytes(&signing_seed), kem: KemKeyPair::generate(kem_seed) }
    }

    /// Sign `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }

    /// Public Ed25519 key bytes.
    pub fn verifying_key(&self) -> [u8; VERIFYING_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// ML-KEM key pair.
    pub fn kem(&self) -> &KemKeyPair {
        &self.kem
    }

    /// Public ML-KEM key.
    pub fn kem_public(&self) -> &KemPublicKey {
        self.kem.public_key()
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("verifying_key", &format_args!("{:02x?}", &self.verifying_key()[..4]))
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature.
///
/// # Errors
///
/// - `InvalidKeyLength` if the key or signature has the wrong size
/// - `InvalidPublicKey` if the key bytes are not a curve point
/// - `InvalidSignature` if verification fails
pub fn verify_signature(
    verifying_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key_bytes: [u8; VERIFYING_KEY_SIZE] = verifying_key.try_into().map_err(|_| {
        CryptoError::InvalidKeyLength { expected: VERIFYING_KEY_SIZE, actual: verifying_key.len() }
    })?;
    let sig_bytes: [u8; SIGNATURE_SIZE] = signature.try_into().map_err(|_| {
        CryptoError::InvalidKeyLength { expected: SIGNATURE_SIZE, actual: signature.len() }
    })?;

    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let sig = Signature::from_bytes(&sig_bytes);

    key.verify(message, &sig).map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(seed: u8) -> IdentityKeys {
        IdentityKeys::from_seeds([seed; 32], [seed.wrapping_add(1); 32])
    }

    #[test]
    fn sign_verify_roundtrip() {
        let id = identity(1);
        let sig = id.sign(b"inbox-id");

        assert!(verify_signature(&id.verifying_key(), b"inbox-id", &sig).is_ok());
    }

    #[test]
    fn wrong_message_rejected() {
        let id = identity(1);
        let sig = id.sign(b"inbox-id");

        assert_eq!(
            verify_signature(&id.verifying_key(), b"other", &sig),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn wrong_signer_rejected() {
        let alice = identity(1);
        let bob = identity(2);
        let sig = bob.sign(b"inbox-id");

        assert!(verify_signature(&alice.verifying_key(), b"inbox-id", &sig).is_err());
    }

    #[test]
    fn malformed_lengths_rejected() {
        let id = identity(3);
        let sig = id.sign(b"m");

        assert!(matches!(
            verify_signature(&[0u8; 31], b"m", &sig),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));
        assert!(matches!(
            verify_signature(&id.verifying_key(), b"m", &sig[..10]),
            Err(CryptoError::InvalidKeyLength { expected: 64, actual: 10 })
        ));
    }

    #[test]
    fn identity_is_deterministic() {
        assert_eq!(identity(4).verifying_key(), identity(4).verifying_key());
        assert_eq!(identity(4).kem_public(), identity(4).kem_public());
    }
}
