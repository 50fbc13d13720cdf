//! Error taxonomy for chat operations.
//!
//! Every failure a caller can observe falls into one of five kinds. The kind,
//! not the message, decides what happens next: retry, catch up, drop, or
//! surface to the user.

use quietline_crypto::CryptoError;
use quietline_proto::ProtocolError;
use thiserror::Error;

/// Errors surfaced by sessions, the codec and the client engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Bad or missing token, or a peer whose signature does not verify.
    /// Never retried.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// AEAD failure, stale serial, oversized skip or inner serial mismatch.
    /// The message is dropped and the session left unchanged.
    #[error("desync or corruption: {0}")]
    DesyncOrCorruption(String),

    /// Unknown inbox or user.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage or network failure; the operation may succeed on retry.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Malformed wire input.
    #[error("bad format: {0}")]
    BadFormat(String),
}

impl ChatError {
    /// Returns true if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

impl From<ProtocolError> for ChatError {
    fn from(err: ProtocolError) -> Self {
        Self::BadFormat(err.to_string())
    }
}

impl From<CryptoError> for ChatError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed { .. } | CryptoError::SkipTooLarge { .. } => {
                Self::DesyncOrCorruption(err.to_string())
            },
            CryptoError::InvalidSignature => Self::AuthFailure(err.to_string()),
            CryptoError::InvalidKeyLength { .. }
            | CryptoError::InvalidCiphertext { .. }
            | CryptoError::InvalidPublicKey(_) => Self::BadFormat(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_is_transient() {
        assert!(ChatError::TransientIo("timeout".to_string()).is_transient());

        assert!(!ChatError::AuthFailure("bad token".to_string()).is_transient());
        assert!(!ChatError::DesyncOrCorruption("tag".to_string()).is_transient());
        assert!(!ChatError::NotFound("inbox".to_string()).is_transient());
        assert!(!ChatError::BadFormat("cbor".to_string()).is_transient());
    }

    #[test]
    fn crypto_errors_map_to_taxonomy() {
        let aead = CryptoError::DecryptionFailed { reason: "authentication failed".to_string() };
        assert!(matches!(ChatError::from(aead), ChatError::DesyncOrCorruption(_)));

        let skip = CryptoError::SkipTooLarge { steps: 2000, max: 1000 };
        assert!(matches!(ChatError::from(skip), ChatError::DesyncOrCorruption(_)));

        assert!(matches!(
            ChatError::from(CryptoError::InvalidSignature),
            ChatError::AuthFailure(_)
        ));

        let len = CryptoError::InvalidKeyLength { expected: 32, actual: 3 };
        assert!(matches!(ChatError::from(len), ChatError::BadFormat(_)));
    }

    #[test]
    fn protocol_errors_are_bad_format() {
        let err = ProtocolError::UnknownOpcode(0xEE);
        assert_eq!(ChatError::from(err), ChatError::BadFormat("unknown opcode: 0xee".to_string()));
    }
}
