//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from ratchet, AEAD, KEM and signature operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Decryption failed (authentication tag mismatch or malformed input)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Ratchet was asked to skip further ahead than allowed
    #[error("ratchet skip too large: {steps} steps, at most {max} allowed")]
    SkipTooLarge {
        /// Requested number of steps
        steps: u64,
        /// Configured limit
        max: u64,
    },

    /// Invalid key material length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// KEM ciphertext has the wrong length
    #[error("invalid KEM ciphertext length: expected {expected}, got {actual}")]
    InvalidCiphertext {
        /// Expected ciphertext length
        expected: usize,
        /// Actual ciphertext length
        actual: usize,
    },

    /// Public key bytes are not a valid key
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Signature did not verify
    #[error("signature verification failed")]
    InvalidSignature,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CryptoError::InvalidKeyLength { expected: 32, actual: 16 };
        assert_eq!(err.to_string(), "invalid key length: expected 32, got 16");
    }
}
