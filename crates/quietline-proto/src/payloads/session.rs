//! Live-stream handshake payloads.

use serde::{Deserialize, Serialize};

/// A user's public identity as published to the relay.
///
/// Opaque to the protocol crate; key lengths are validated where the keys are
/// parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    /// Ed25519 verifying key (32 bytes)
    pub signing_key: Vec<u8>,
    /// ML-KEM-1024 encapsulation key (1568 bytes)
    pub kem_key: Vec<u8>,
}

/// First frame on the live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Username the client claims
    pub username: String,
    /// Identity the username is bound to
    pub identity: PublicIdentity,
}

/// Server challenge answering a [`Hello`].
///
/// The client proves it holds the signing key named in its `Hello` by signing
/// the nonce together with its username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Fresh random nonce
    pub nonce: Vec<u8>,
}

/// Client answer to a [`Challenge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// Ed25519 signature over the login transcript
    pub signature: Vec<u8>,
}

/// Server acceptance of a [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Username as registered
    pub username: String,
    /// Server wall clock (Unix seconds)
    pub server_time: u64,
}
