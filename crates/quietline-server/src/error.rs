//! Server error types.

use std::fmt;

use crate::{relay::RelayError, storage::StorageError};

/// Errors that can occur in the server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, missing TLS certs, etc.).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (connection failure, I/O error, etc.).
    ///
    /// Fatal for the connection it happened on, the server keeps serving
    /// other clients.
    Transport(String),

    /// A client sent something that is not a valid frame or payload.
    Protocol(String),

    /// Storage backend failed to open or serve a request.
    Storage(StorageError),

    /// Unexpected state. Indicates a bug.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<RelayError> for ServerError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Storage(e) => Self::Storage(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<quietline_proto::ProtocolError> for ServerError {
    fn from(err: quietline_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = ServerError::Config("no key".to_string());
        assert_eq!(err.to_string(), "configuration error: no key");

        let err = ServerError::from(StorageError::Io("disk full".to_string()));
        assert!(err.to_string().starts_with("storage error:"));
    }

    #[test]
    fn relay_storage_errors_stay_storage() {
        let err = ServerError::from(RelayError::Storage(StorageError::Io("x".to_string())));
        assert!(matches!(err, ServerError::Storage(_)));

        let err = ServerError::from(RelayError::BadRequest("cbor".to_string()));
        assert!(matches!(err, ServerError::Protocol(_)));
    }
}
