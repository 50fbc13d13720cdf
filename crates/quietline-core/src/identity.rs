//! Local and peer identities.

use quietline_crypto::{
    IdentityKeys, KemKeyPair, KemPublicKey, SIGNATURE_SIZE, VERIFYING_KEY_SIZE, verify_signature,
};
use quietline_proto::PublicIdentity;

use crate::error::ChatError;

/// Domain separator for live-stream login signatures.
pub const LOGIN_CONTEXT: &[u8] = b"quietline-login-v1";

/// Bytes signed to answer a login challenge.
///
/// `context || u16 BE username length || username || nonce`. The length
/// prefix keeps one `(username, nonce)` split from being read as another.
pub fn login_transcript(username: &str, nonce: &[u8]) -> Vec<u8> {
    let name = username.as_bytes();
    let len = u16::try_from(name.len()).unwrap_or(u16::MAX);

    let mut transcript = Vec::with_capacity(LOGIN_CONTEXT.len() + 2 + name.len() + nonce.len());
    transcript.extend_from_slice(LOGIN_CONTEXT);
    transcript.extend_from_slice(&len.to_be_bytes());
    transcript.extend_from_slice(name);
    transcript.extend_from_slice(nonce);
    transcript
}

/// The local user: a username and its private keys.
#[derive(Debug)]
pub struct LocalIdentity {
    username: String,
    keys: IdentityKeys,
}

impl LocalIdentity {
    /// Bind a username to identity keys.
    pub fn new(username: impl Into<String>, keys: IdentityKeys) -> Self {
        Self { username: username.into(), keys }
    }

    /// Username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Sign `message` with the long-term signing key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.keys.sign(message)
    }

    /// Answer a login challenge for this username.
    pub fn sign_login(&self, nonce: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.sign(&login_transcript(&self.username, nonce))
    }

    /// Long-term KEM key pair.
    pub fn kem(&self) -> &KemKeyPair {
        self.keys.kem()
    }

    /// Public identity to publish in `Hello`.
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            signing_key: self.keys.verifying_key().to_vec(),
            kem_key: self.keys.kem_public().to_bytes(),
        }
    }
}

/// A peer's parsed public identity.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerIdentity {
    username: String,
    signing_key: [u8; VERIFYING_KEY_SIZE],
    kem_key: KemPublicKey,
}

impl PeerIdentity {
    /// Parse a published identity.
    ///
    /// # Errors
    ///
    /// - `BadFormat` if either key has the wrong length
    pub fn from_public(
        username: impl Into<String>,
        identity: &PublicIdentity,
    ) -> Result<Self, ChatError> {
        let signing_key: [u8; VERIFYING_KEY_SIZE] =
            identity.signing_key.as_slice().try_into().map_err(|_| {
                ChatError::BadFormat(format!(
                    "signing key must be {VERIFYING_KEY_SIZE} bytes, got {}",
                    identity.signing_key.len()
                ))
            })?;
        let kem_key = KemPublicKey::from_bytes(&identity.kem_key)?;

        Ok(Self { username: username.into(), signing_key, kem_key })
    }

    /// Username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// ML-KEM public key.
    pub fn kem_key(&self) -> &KemPublicKey {
        &self.kem_key
    }

    /// Published form of this identity.
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity { signing_key: self.signing_key.to_vec(), kem_key: self.kem_key.to_bytes() }
    }

    /// Verify a signature made by this peer.
    ///
    /// # Errors
    ///
    /// - `AuthFailure` if the signature does not verify
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), ChatError> {
        verify_signature(&self.signing_key, message, signature).map_err(|e| match e {
            quietline_crypto::CryptoError::InvalidSignature => {
                ChatError::AuthFailure(format!("signature from {} does not verify", self.username))
            },
            other => ChatError::from(other),
        })
    }

    /// Verify a login challenge answer from this peer.
    ///
    /// # Errors
    ///
    /// - `AuthFailure` if the signature is not over this username and nonce
    pub fn verify_login(&self, nonce: &[u8], signature: &[u8]) -> Result<(), ChatError> {
        self.verify(&login_transcript(&self.username, nonce), signature).map_err(|e| match e {
            ChatError::BadFormat(msg) => ChatError::AuthFailure(msg),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, seed: u8) -> LocalIdentity {
        LocalIdentity::new(name, IdentityKeys::from_seeds([seed; 32], [seed; 32]))
    }

    #[test]
    fn peer_from_published_identity() {
        let alice = local("alice", 1);
        let peer = PeerIdentity::from_public("alice", &alice.public()).unwrap();

        assert_eq!(peer.username(), "alice");
        assert_eq!(peer.kem_key(), alice.kem().public_key());
    }

    #[test]
    fn peer_verifies_its_signatures() {
        let alice = local("alice", 1);
        let peer = PeerIdentity::from_public("alice", &alice.public()).unwrap();

        let sig = alice.sign(b"inbox");
        assert!(peer.verify(b"inbox", &sig).is_ok());
        assert!(matches!(peer.verify(b"other", &sig), Err(ChatError::AuthFailure(_))));
    }

    #[test]
    fn login_signature_binds_username_and_nonce() {
        let alice = local("alice", 1);
        let peer = PeerIdentity::from_public("alice", &alice.public()).unwrap();
        let sig = alice.sign_login(&[7; 32]);

        assert!(peer.verify_login(&[7; 32], &sig).is_ok());
        assert!(matches!(peer.verify_login(&[8; 32], &sig), Err(ChatError::AuthFailure(_))));

        // Same keys claimed under another name
        let renamed = PeerIdentity::from_public("mallory", &alice.public()).unwrap();
        assert!(matches!(renamed.verify_login(&[7; 32], &sig), Err(ChatError::AuthFailure(_))));
    }

    #[test]
    fn truncated_login_signature_is_auth_failure() {
        let alice = local("alice", 1);
        let peer = PeerIdentity::from_public("alice", &alice.public()).unwrap();

        assert!(matches!(peer.verify_login(&[7; 32], &[0; 10]), Err(ChatError::AuthFailure(_))));
    }

    #[test]
    fn malformed_identity_rejected() {
        let bad = PublicIdentity { signing_key: vec![0; 5], kem_key: vec![0; 5] };
        assert!(matches!(PeerIdentity::from_public("x", &bad), Err(ChatError::BadFormat(_))));

        let alice = local("alice", 1);
        let short_kem = PublicIdentity { kem_key: vec![0; 10], ..alice.public() };
        assert!(matches!(PeerIdentity::from_public("x", &short_kem), Err(ChatError::BadFormat(_))));
    }
}
