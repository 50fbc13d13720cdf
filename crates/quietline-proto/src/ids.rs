//! Inbox identifiers

use serde::{Deserialize, Serialize};

/// Size of an inbox id in bytes.
pub const INBOX_ID_SIZE: usize = 32;

/// Anonymous inbox code.
///
/// 32 random bytes chosen by the relay. Carries no information about either
/// participant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InboxId(pub [u8; INBOX_ID_SIZE]);

impl InboxId {
    /// Parse from a slice, `None` if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; INBOX_ID_SIZE] {
        &self.0
    }
}

impl std::fmt::Display for InboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for InboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix keeps logs readable
        write!(f, "InboxId(")?;
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}
