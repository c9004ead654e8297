//! Persistent local state using redb
//!
//! Two tables:
//! - session snapshots keyed by session code, written on every
//!   state-mutating broadcast so a facilitator restart can recover
//! - the identity record under a fixed key, written once at create/join
//!   time and deleted on leave/close

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, TableDefinition};

use crate::code::SessionCode;
use crate::error::SessionError;
use crate::types::{IdentityRecord, Session};

const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const IDENTITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Identity storage key (there is only one identity per process)
    const IDENTITY_KEY: &'static str = "me";

    /// Create a new storage instance at the given path.
    ///
    /// Creates the database directory and all required tables if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
            let _ = write_txn.open_table(IDENTITY_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Save a session snapshot, overwriting any previous one for the code
    pub fn save_session(&self, session: &Session) -> Result<(), SessionError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            let data = serde_json::to_vec(session)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;
            table.insert(session.code.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the session snapshot for a code.
    ///
    /// Returns `None` if no snapshot exists.
    pub fn load_session(&self, code: &SessionCode) -> Result<Option<Session>, SessionError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        match table.get(code.as_str())? {
            Some(v) => {
                let session: Session = serde_json::from_slice(v.value())
                    .map_err(|e| SessionError::Serialization(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Delete the session snapshot for a code; no-op if absent
    pub fn delete_session(&self, code: &SessionCode) -> Result<(), SessionError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            table.remove(code.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Save the identity record under the fixed key
    pub fn save_identity(&self, identity: &IdentityRecord) -> Result<(), SessionError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            let data = serde_json::to_vec(identity)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;
            table.insert(Self::IDENTITY_KEY, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the identity record.
    ///
    /// Returns `None` if no identity has been persisted.
    pub fn load_identity(&self) -> Result<Option<IdentityRecord>, SessionError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(IDENTITY_TABLE)?;

        match table.get(Self::IDENTITY_KEY)? {
            Some(v) => {
                let identity: IdentityRecord = serde_json::from_slice(v.value())
                    .map_err(|e| SessionError::Serialization(e.to_string()))?;
                Ok(Some(identity))
            }
            None => Ok(None),
        }
    }

    /// Delete the identity record; no-op if absent
    pub fn clear_identity(&self) -> Result<(), SessionError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            table.remove(Self::IDENTITY_KEY)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
