//! Relay error type.

use std::fmt;

use quietline_core::ChatError;
use quietline_proto::ErrorPayload;

use crate::storage::StorageError;

/// Errors from relay, directory and router operations.
///
/// Each variant maps to one status code on the wire.
#[derive(Debug)]
pub enum RelayError {
    /// Unknown inbox or user.
    NotFound(String),

    /// Missing or wrong inbox token.
    Unauthorized(String),

    /// Malformed request.
    BadRequest(String),

    /// Identity already pinned to a different key.
    Conflict(String),

    /// Storage backend failure.
    Storage(StorageError),
}

impl RelayError {
    /// Wire status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => ErrorPayload::NOT_FOUND,
            Self::Unauthorized(_) => ErrorPayload::UNAUTHORIZED,
            Self::BadRequest(_) => ErrorPayload::BAD_REQUEST,
            Self::Conflict(_) => ErrorPayload::CONFLICT,
            Self::Storage(_) => ErrorPayload::INTERNAL,
        }
    }

    /// Error frame payload sent back to the client.
    ///
    /// Storage failures are reported without their details.
    pub fn to_payload(&self) -> ErrorPayload {
        let message = match self {
            Self::Storage(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ErrorPayload::new(self.status(), message)
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for RelayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            StorageError::Conflict(what) => Self::Conflict(what),
            other => Self::Storage(other),
        }
    }
}

impl From<RelayError> for ChatError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound(msg) => ChatError::NotFound(msg),
            RelayError::Unauthorized(msg) | RelayError::Conflict(msg) => {
                ChatError::AuthFailure(msg)
            },
            RelayError::BadRequest(msg) => ChatError::BadFormat(msg),
            RelayError::Storage(err) => ChatError::TransientIo(err.to_string()),
        }
    }
}
