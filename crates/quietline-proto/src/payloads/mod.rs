//! CBOR-encoded protocol messages.
//!
//! The frame's opcode identifies the payload type, so only the inner struct is
//! serialized. Payloads fall into three groups: the live-stream handshake and
//! keepalive, live messaging (`Send`/`Deliver`), and relay RPC.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Round-trip encoding must produce identical values.

pub mod chat;
pub mod relay;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
///
/// # Security
///
/// - No Variant Tag: the opcode byte already names the variant. A frame whose
///   body does not parse as the opcode's struct is rejected.
/// - Exhaustive Matching: adding a variant breaks `encode`, `decode` and
///   `opcode` until it is handled in each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Live stream
    /// Client greeting
    Hello(session::Hello),
    /// Server acceptance
    HelloReply(session::HelloReply),
    /// Keepalive
    Heartbeat,
    /// Login nonce
    Challenge(session::Challenge),
    /// Signed login nonce
    ChallengeResponse(session::ChallengeResponse),
    /// Ciphertext for a peer
    Send(chat::SendMessage),
    /// Ciphertext for this client
    Deliver(chat::Deliver),

    // Relay RPC
    /// Request a fresh inbox
    CreateInbox,
    /// New inbox id
    InboxCreated(relay::InboxCreated),
    /// Leave a new-chat notification
    NotifyInbox(relay::NotifyInbox),
    /// Fetch own pending notifications
    FetchNewChats,
    /// Pending notifications
    NewChats(relay::NewChats),
    /// Fetch sealed token
    FetchToken(relay::FetchToken),
    /// Sealed token
    Token(relay::Token),
    /// Fetch queued ciphertext
    FetchMessages(relay::FetchMessages),
    /// Queued ciphertext
    Messages(relay::Messages),
    /// Look up a user
    ResolveUser(relay::ResolveUser),
    /// User identity
    UserInfo(relay::UserInfo),
    /// Search usernames
    SearchUsers(relay::SearchUsers),
    /// Matching usernames
    UserList(relay::UserList),
    /// Empty success
    Ack,

    /// Error response
    Error(ErrorPayload),
}

/// Error payload for error frames.
///
/// Status codes follow HTTP semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Status code
    pub status: u16,
    /// Human-readable error message
    pub message: String,
}

impl ErrorPayload {
    /// Malformed request body.
    pub const BAD_REQUEST: u16 = 400;
    /// Bad token or unauthenticated stream.
    pub const UNAUTHORIZED: u16 = 401;
    /// Unknown inbox or user.
    pub const NOT_FOUND: u16 = 404;
    /// Identity conflict for a username.
    pub const CONFLICT: u16 = 409;
    /// Server-side failure.
    pub const INTERNAL: u16 = 500;

    /// Create an error with the given status.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// Create a bad request error.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(Self::BAD_REQUEST, msg)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(Self::UNAUTHORIZED, msg)
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, msg)
    }
}

fn cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Heartbeat => Opcode::Heartbeat,
            Self::Challenge(_) => Opcode::Challenge,
            Self::ChallengeResponse(_) => Opcode::ChallengeResponse,
            Self::Send(_) => Opcode::Send,
            Self::Deliver(_) => Opcode::Deliver,
            Self::CreateInbox => Opcode::CreateInbox,
            Self::InboxCreated(_) => Opcode::InboxCreated,
            Self::NotifyInbox(_) => Opcode::NotifyInbox,
            Self::FetchNewChats => Opcode::FetchNewChats,
            Self::NewChats(_) => Opcode::NewChats,
            Self::FetchToken(_) => Opcode::FetchToken,
            Self::Token(_) => Opcode::Token,
            Self::FetchMessages(_) => Opcode::FetchMessages,
            Self::Messages(_) => Opcode::Messages,
            Self::ResolveUser(_) => Opcode::ResolveUser,
            Self::UserInfo(_) => Opcode::UserInfo,
            Self::SearchUsers(_) => Opcode::SearchUsers,
            Self::UserList(_) => Opcode::UserList,
            Self::Ack => Opcode::Ack,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode payload body to buffer
    ///
    /// Serializes only the inner struct, NOT the variant tag. Empty variants
    /// produce zero bytes. Size limits are enforced later by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Heartbeat | Self::CreateInbox | Self::FetchNewChats | Self::Ack => Ok(()),
            Self::Hello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HelloReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Challenge(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ChallengeResponse(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Send(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Deliver(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::InboxCreated(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::NotifyInbox(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::NewChats(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::FetchToken(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Token(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::FetchMessages(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Messages(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ResolveUser(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserInfo(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::SearchUsers(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserList(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload body based on opcode
    ///
    /// # Security
    ///
    /// - Size Validation First: oversized input is rejected before the CBOR
    ///   parser sees it.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if bytes exceed [`Frame::MAX_SIZE`]
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > Frame::MAX_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: Frame::MAX_SIZE });
        }

        let payload = match opcode {
            Opcode::Heartbeat => Self::Heartbeat,
            Opcode::CreateInbox => Self::CreateInbox,
            Opcode::FetchNewChats => Self::FetchNewChats,
            Opcode::Ack => Self::Ack,
            Opcode::Hello => Self::Hello(cbor(bytes)?),
            Opcode::HelloReply => Self::HelloReply(cbor(bytes)?),
            Opcode::Challenge => Self::Challenge(cbor(bytes)?),
            Opcode::ChallengeResponse => Self::ChallengeResponse(cbor(bytes)?),
            Opcode::Send => Self::Send(cbor(bytes)?),
            Opcode::Deliver => Self::Deliver(cbor(bytes)?),
            Opcode::InboxCreated => Self::InboxCreated(cbor(bytes)?),
            Opcode::NotifyInbox => Self::NotifyInbox(cbor(bytes)?),
            Opcode::NewChats => Self::NewChats(cbor(bytes)?),
            Opcode::FetchToken => Self::FetchToken(cbor(bytes)?),
            Opcode::Token => Self::Token(cbor(bytes)?),
            Opcode::FetchMessages => Self::FetchMessages(cbor(bytes)?),
            Opcode::Messages => Self::Messages(cbor(bytes)?),
            Opcode::ResolveUser => Self::ResolveUser(cbor(bytes)?),
            Opcode::UserInfo => Self::UserInfo(cbor(bytes)?),
            Opcode::SearchUsers => Self::SearchUsers(cbor(bytes)?),
            Opcode::UserList => Self::UserList(cbor(bytes)?),
            Opcode::Error => Self::Error(cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(self.opcode(), buf))
    }

    /// Parse payload from a transport frame
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Self::decode(frame.opcode, &frame.body)
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "Hello",
            Self::HelloReply(_) => "HelloReply",
            Self::Heartbeat => "Heartbeat",
            Self::Challenge(_) => "Challenge",
            Self::ChallengeResponse(_) => "ChallengeResponse",
            Self::Send(_) => "Send",
            Self::Deliver(_) => "Deliver",
            Self::CreateInbox => "CreateInbox",
            Self::InboxCreated(_) => "InboxCreated",
            Self::NotifyInbox(_) => "NotifyInbox",
            Self::FetchNewChats => "FetchNewChats",
            Self::NewChats(_) => "NewChats",
            Self::FetchToken(_) => "FetchToken",
            Self::Token(_) => "Token",
            Self::FetchMessages(_) => "FetchMessages",
            Self::Messages(_) => "Messages",
            Self::ResolveUser(_) => "ResolveUser",
            Self::UserInfo(_) => "UserInfo",
            Self::SearchUsers(_) => "SearchUsers",
            Self::UserList(_) => "UserList",
            Self::Ack => "Ack",
            Self::Error(_) => "Error",
        }
    }
}
