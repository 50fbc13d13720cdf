//! Local session archive.
//!
//! Keeps every chat session in a redb file so a restarted client resumes each
//! chat at the serial and key it left off at. Records are CBOR, sealed with
//! XChaCha20-Poly1305 under a key derived from the local identity, so the file
//! on disk reveals neither keys nor history.

use std::{path::Path, sync::Arc};

use quietline_core::{ChatError, ChatSession, Environment, LocalIdentity, SessionState};
use quietline_crypto::{ChatKey, NONCE_SIZE, derive_subkey, open, seal};
use quietline_proto::{Event, InboxId, PublicIdentity};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};

/// Table: sessions
/// Key: inbox id [32 bytes]
/// Value: sealed CBOR-encoded SessionRecord
const SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sessions");

/// Label for deriving the archive key from the identity's KEM seed.
pub const ARCHIVE_LABEL: &[u8] = b"quietline-archive-v1";

/// On-disk form of a session.
#[derive(Serialize, Deserialize)]
struct SessionRecord {
    inbox_id: InboxId,
    local_username: String,
    peer_username: String,
    peer_identity: PublicIdentity,
    initiator: String,
    key: Vec<u8>,
    serial_start: u64,
    current_serial: u64,
    last_rotation_serial: Option<u64>,
    events: Vec<Event>,
}

impl SessionRecord {
    fn from_state(state: SessionState) -> Self {
        Self {
            inbox_id: state.inbox_id,
            local_username: state.local_username,
            peer_username: state.peer_username,
            peer_identity: state.peer_identity,
            initiator: state.initiator,
            key: state.key.as_bytes().to_vec(),
            serial_start: state.serial_start,
            current_serial: state.current_serial,
            last_rotation_serial: state.last_rotation_serial,
            events: state.events,
        }
    }

    fn into_state(mut self) -> Result<SessionState, ChatError> {
        let key = ChatKey::from_slice(&self.key);
        self.key.fill(0);

        Ok(SessionState {
            inbox_id: self.inbox_id,
            local_username: self.local_username,
            peer_username: self.peer_username,
            peer_identity: self.peer_identity,
            initiator: self.initiator,
            key: key?,
            serial_start: self.serial_start,
            current_serial: self.current_serial,
            last_rotation_serial: self.last_rotation_serial,
            events: self.events,
        })
    }
}

fn io(e: impl std::fmt::Display) -> ChatError {
    ChatError::TransientIo(format!("session archive: {e}"))
}

/// Sealed, durable copy of this client's sessions.
///
/// Clone is cheap (Arc).
#[derive(Clone)]
pub struct SessionArchive {
    db: Arc<Database>,
    key: Arc<ChatKey>,
}

impl std::fmt::Debug for SessionArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionArchive").finish_non_exhaustive()
    }
}

impl SessionArchive {
    /// Archive key belonging to `identity`.
    pub fn key_for(identity: &LocalIdentity) -> ChatKey {
        derive_subkey(identity.kem().seed(), ARCHIVE_LABEL)
    }

    /// Open or create an archive at `path`, sealed under `key`.
    ///
    /// # Errors
    ///
    /// - `TransientIo` if the file cannot be opened or created
    pub fn open(path: impl AsRef<Path>, key: ChatKey) -> Result<Self, ChatError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(SESSIONS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db), key: Arc::new(key) })
    }

    /// Write `session`, replacing any earlier copy.
    ///
    /// # Errors
    ///
    /// - `TransientIo` if the write fails
    /// - `BadFormat` if the session cannot be encoded
    pub fn save(&self, env: &impl Environment, session: &ChatSession) -> Result<(), ChatError> {
        let mut record = SessionRecord::from_state(session.state());
        let mut plain = Vec::new();
        let encoded = ciborium::ser::into_writer(&record, &mut plain);
        record.key.fill(0);
        encoded.map_err(|e| ChatError::BadFormat(format!("encode session: {e}")))?;

        let sealed = seal(&self.key, &plain, env.random_array::<NONCE_SIZE>());
        plain.fill(0);

        let inbox = session.inbox_id();
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(io)?;
            table.insert(inbox.as_bytes().as_slice(), sealed.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    /// Every stored session.
    ///
    /// # Errors
    ///
    /// - `TransientIo` if the read fails
    /// - `DesyncOrCorruption` if a record does not open under this key
    /// - `BadFormat` if a record is malformed or filed under the wrong inbox
    pub fn load_all(&self) -> Result<Vec<ChatSession>, ChatError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SESSIONS).map_err(io)?;

        let mut sessions = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (key, value) = entry.map_err(io)?;

            let mut plain = open(&self.key, value.value())?;
            let decoded: Result<SessionRecord, _> = ciborium::de::from_reader(plain.as_slice());
            plain.fill(0);
            let record = decoded.map_err(|e| ChatError::BadFormat(format!("decode session: {e}")))?;

            if record.inbox_id.as_bytes().as_slice() != key.value() {
                return Err(ChatError::BadFormat(format!(
                    "session for inbox {} filed under another key",
                    record.inbox_id
                )));
            }
            sessions.push(ChatSession::restore(record.into_state()?)?);
        }
        Ok(sessions)
    }

    /// Number of stored sessions.
    ///
    /// # Errors
    ///
    /// - `TransientIo` if the read fails
    pub fn count(&self) -> Result<u64, ChatError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SESSIONS).map_err(io)?;
        table.len().map_err(io)
    }
}
