//! Error types for Pointcast

use thiserror::Error;

/// Main error type for Pointcast operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// Display name was empty or whitespace
    #[error("Display name must not be empty")]
    EmptyName,

    /// Session code was empty
    #[error("Session code must not be empty")]
    EmptyCode,

    /// Session code had the wrong length or characters outside the alphabet
    #[error("Invalid session code: {0}")]
    InvalidCode(String),

    /// No facilitator is bound at the address for this code
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session already holds the maximum number of voters
    #[error("Session is full")]
    SessionFull,

    /// Could not bind a session code (create retries exhausted, or the
    /// old binding was still held during restore)
    #[error("Session code already taken: {0}")]
    CodeTaken(String),

    /// Catch-all for transport failures during create/join
    #[error("Peer error: {0}")]
    PeerError(String),

    /// No identity record persisted; nothing to restore
    #[error("No identity record found")]
    NoIdentity,

    /// Identity record exists but the session snapshot is gone
    #[error("Session snapshot missing for code: {0}")]
    SnapshotMissing(String),

    /// Operation requires the facilitator role
    #[error("Operation requires facilitator role: {0}")]
    NotFacilitator(String),

    /// Operation requires an active participant connection
    #[error("Not joined to a session: {0}")]
    NotJoined(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;
