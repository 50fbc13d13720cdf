//! Opcode table
//!
//! The opcode byte is the only thing identifying a frame's payload. Ranges:
//! `0x0_` session, `0x1_` live messaging, `0x2_` relay RPC, `0x7F` error.

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Client greeting carrying its identity
    Hello = 0x01,
    /// Server acceptance of a Hello
    HelloReply = 0x02,
    /// Keepalive, empty body
    Heartbeat = 0x03,
    /// Server nonce the client must sign
    Challenge = 0x04,
    /// Client signature over the challenge
    ChallengeResponse = 0x05,

    /// Client submits ciphertext for a peer
    Send = 0x10,
    /// Server forwards ciphertext to a live recipient
    Deliver = 0x11,

    /// Request a fresh inbox
    CreateInbox = 0x20,
    /// Response carrying a new inbox id
    InboxCreated = 0x21,
    /// Leave a new-chat notification for a user
    NotifyInbox = 0x22,
    /// Fetch pending new-chat notifications
    FetchNewChats = 0x23,
    /// Pending new-chat notifications
    NewChats = 0x24,
    /// Fetch the sealed token for an inbox
    FetchToken = 0x25,
    /// Sealed token response
    Token = 0x26,
    /// Fetch queued ciphertext for an inbox
    FetchMessages = 0x27,
    /// Queued ciphertext response
    Messages = 0x28,
    /// Look up a user's public identity
    ResolveUser = 0x29,
    /// Public identity response
    UserInfo = 0x2A,
    /// Empty success response
    Ack = 0x2B,
    /// Paged username search
    SearchUsers = 0x2C,
    /// Username search response
    UserList = 0x2D,

    /// Error response
    Error = 0x7F,
}

impl Opcode {
    /// Parse an opcode byte.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::Hello,
            0x02 => Self::HelloReply,
            0x03 => Self::Heartbeat,
            0x04 => Self::Challenge,
            0x05 => Self::ChallengeResponse,
            0x10 => Self::Send,
            0x11 => Self::Deliver,
            0x20 => Self::CreateInbox,
            0x21 => Self::InboxCreated,
            0x22 => Self::NotifyInbox,
            0x23 => Self::FetchNewChats,
            0x24 => Self::NewChats,
            0x25 => Self::FetchToken,
            0x26 => Self::Token,
            0x27 => Self::FetchMessages,
            0x28 => Self::Messages,
            0x29 => Self::ResolveUser,
            0x2A => Self::UserInfo,
            0x2B => Self::Ack,
            0x2C => Self::SearchUsers,
            0x2D => Self::UserList,
            0x7F => Self::Error,
            _ => return None,
        })
    }

    /// Wire byte for this opcode.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this opcode opens a relay RPC stream.
    pub const fn is_relay_request(self) -> bool {
        matches!(
            self,
            Self::CreateInbox
                | Self::NotifyInbox
                | Self::FetchNewChats
                | Self::FetchToken
                | Self::FetchMessages
                | Self::ResolveUser
                | Self::SearchUsers
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_round_trips_or_is_rejected() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op.to_u8(), byte);
            }
        }
    }

    #[test]
    fn unknown_bytes_rejected() {
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0x12), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn relay_requests() {
        assert!(Opcode::FetchMessages.is_relay_request());
        assert!(Opcode::SearchUsers.is_relay_request());
        assert!(!Opcode::Challenge.is_relay_request());
        assert!(!Opcode::Messages.is_relay_request());
        assert!(!Opcode::Send.is_relay_request());
    }
}
