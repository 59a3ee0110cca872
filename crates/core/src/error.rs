//! Unified error type for the store
//!
//! Every crate in the workspace returns [`Result`]. Reads that find nothing
//! return `Option::None`; errors are reserved for genuine faults.

use crate::diagnostic::DiagnosticMessage;
use crate::identity::Identity;
use crate::types::SessionId;
use thiserror::Error;

/// All store errors
#[derive(Debug, Error)]
pub enum Error {
    /// Wait-for cycle or deadlock timeout while acquiring a lock
    #[error("deadlock detected on {resource} for session {session}")]
    DeadLock {
        /// Resource being acquired
        resource: String,
        /// Session whose acquire was aborted
        session: SessionId,
    },

    /// Serializable session wrote a resource committed after its snapshot
    #[error("serializable conflict on {resource} for session {session}")]
    SerializableTransaction {
        /// Conflicting resource
        resource: String,
        /// Session that lost the race
        session: SessionId,
    },

    /// Constraint validation aborted the session
    #[error("session aborted with {} message(s)", messages.len())]
    Session {
        /// Aggregated diagnostics
        messages: Vec<DiagnosticMessage>,
    },

    /// Node required by the operation does not exist
    #[error("node not found: {0}")]
    NodeNotFound(Identity),

    /// Node already exists
    #[error("duplicate node: {0}")]
    DuplicateNode(Identity),

    /// Unknown schema
    #[error("schema not found: {0}")]
    SchemaNotFound(Identity),

    /// Malformed identity string
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Write attempted in a read-only session
    #[error("session is read-only")]
    ReadOnlySession,

    /// Operation needs a current session
    #[error("no active session")]
    NoActiveSession,

    /// Session was already accepted or rolled back
    #[error("session already completed")]
    SessionCompleted,

    /// Constraint tried to write to the model
    #[error("constraints cannot modify the model")]
    ConstraintWriteForbidden,

    /// Cancellation token was triggered
    #[error("operation cancelled")]
    Cancelled,

    /// Optimistic version check failed
    #[error("version conflict on {id}: expected {expected}, actual {actual}")]
    VersionConflict {
        /// Element whose version was checked
        id: Identity,
        /// Version supplied by the caller
        expected: u64,
        /// Version found in the store
        actual: u64,
    },

    /// Operation not valid in the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Bad configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error may succeed on retry
    ///
    /// Lock contention failures are retryable. Constraint and structural
    /// errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DeadLock { .. }
                | Error::SerializableTransaction { .. }
                | Error::VersionConflict { .. }
        )
    }

    /// Check if this is a concurrency conflict
    pub fn is_conflict(&self) -> bool {
        self.is_retryable()
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NodeNotFound(_) | Error::SchemaNotFound(_))
    }

    /// Diagnostics carried by a session abort
    pub fn messages(&self) -> &[DiagnosticMessage] {
        match self {
            Error::Session { messages } => messages,
            _ => &[],
        }
    }
}
