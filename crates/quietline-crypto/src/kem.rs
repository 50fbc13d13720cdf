//! ML-KEM-1024 key encapsulation
//!
//! Key generation and encapsulation take a 32-byte seed from the caller and
//! expand it with `ChaCha20`, so the module itself never touches the OS RNG.

use ml_kem::{
    Ciphertext, EncodedSizeUser, KemCore, MlKem1024,
    kem::{Decapsulate, Encapsulate},
};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use zeroize::Zeroize;

use crate::{error::CryptoError, ratchet::ChatKey};

type EncapsulationKey = <MlKem1024 as KemCore>::EncapsulationKey;
type DecapsulationKey = <MlKem1024 as KemCore>::DecapsulationKey;

/// Encoded ML-KEM-1024 encapsulation key size.
pub const PUBLIC_KEY_SIZE: usize = 1568;

/// ML-KEM-1024 ciphertext size.
pub const CIPHERTEXT_SIZE: usize = 1568;

/// A peer's ML-KEM public (encapsulation) key.
#[derive(Clone, PartialEq)]
pub struct KemPublicKey(EncapsulationKey);

impl KemPublicKey {
    /// Parse an encoded encapsulation key.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if `bytes` is not [`PUBLIC_KEY_SIZE`] long
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let encoded = ml_kem::Encoded::<EncapsulationKey>::try_from(bytes).map_err(|_| {
            CryptoError::InvalidKeyLength { expected: PUBLIC_KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(EncapsulationKey::from_bytes(&encoded)))
    }

    /// Encoded key bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

impl std::fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.as_bytes();
        f.debug_struct("KemPublicKey")
            .field("prefix", &format_args!("{:02x?}", &bytes[..4]))
            .finish()
    }
}

/// Long-term ML-KEM key pair.
///
/// Reconstructible from its 32-byte seed, which is the only form worth
/// persisting.
pub struct KemKeyPair {
    seed: [u8; 32],
    decapsulation: DecapsulationKey,
    public: KemPublicKey,
}

impl KemKeyPair {
    /// Deterministically generate a key pair from `seed`.
    pub fn generate(seed: [u8; 32]) -> Self {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let (decapsulation, encapsulation) = MlKem1024::generate(&mut rng);

        Self { seed, decapsulation, public: KemPublicKey(encapsulation) }
    }

    /// Seed this pair was generated from.
    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    /// Public half, safe to publish.
    pub fn public_key(&self) -> &KemPublicKey {
        &self.public
    }

    /// Recover the shared secret from a ciphertext addressed to this pair.
    ///
    /// ML-KEM uses implicit rejection: a well-sized but forged ciphertext
    /// yields an unrelated key, which then fails AEAD authentication.
    ///
    /// # Errors
    ///
    /// - `InvalidCiphertext` if the ciphertext has the wrong length
    pub fn decapsulate(&self, ciphertext: &[u8]) -> Result<ChatKey, CryptoError> {
        let ct = Ciphertext::<MlKem1024>::try_from(ciphertext).map_err(|_| {
            CryptoError::InvalidCiphertext { expected: CIPHERTEXT_SIZE, actual: ciphertext.len() }
        })?;

        let shared = self.decapsulation.decapsulate(&ct).map_err(|_| {
            CryptoError::DecryptionFailed { reason: "ML-KEM decapsulation failed".to_string() }
        })?;

        ChatKey::from_slice(shared.as_slice())
    }
}

impl std::fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

impl Drop for KemKeyPair {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

/// Encapsulate a fresh shared secret to `public`.
///
/// Returns `(ciphertext, shared_key)`. The ciphertext goes to the peer, the
/// shared key becomes the new chat key.
///
/// # Errors
///
/// - `InvalidPublicKey` if encapsulation against the key fails
pub fn encapsulate(
    public: &KemPublicKey,
    seed: [u8; 32],
) -> Result<(Vec<u8>, ChatKey), CryptoError> {
    let mut rng = ChaCha20Rng::from_seed(seed);

    let (ct, shared) = public
        .0
        .encapsulate(&mut rng)
        .map_err(|_| CryptoError::InvalidPublicKey("ML-KEM encapsulation failed".to_string()))?;

    Ok((ct.to_vec(), ChatKey::from_slice(shared.as_slice())?))
}
