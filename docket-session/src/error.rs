//! Session catalog error types.

use docket_core::SessionId;
use docket_runtime::RuntimeError;
use thiserror::Error;

/// Result type for session catalog operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur in session catalog operations.
///
/// Programmer errors (double check-out, releasing an idle entry, nesting
/// quiesce barriers, waiting while holding storage locks) are not
/// represented here: they are assertions and terminate the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The operation was interrupted while waiting inside the catalog.
    #[error(transparent)]
    Interrupted(#[from] RuntimeError),

    /// Session invalidation was requested by an operation that itself
    /// carries a session, while this node is in a replica set.
    #[error(
        "direct writes against the transaction table cannot be performed \
         on an operation bound to session {session_id}"
    )]
    DirectWriteForbidden {
        /// The session the requesting operation carries.
        session_id: SessionId,
    },

    /// The durable transaction table could not be created on step-up.
    #[error("failed to create the {namespace} table: {message}")]
    TableCreationFailed {
        /// The table namespace.
        namespace: String,
        /// The underlying storage error.
        message: String,
    },

    /// A single-session invalidation record did not carry a well-formed
    /// session ID.
    #[error("malformed session record: {reason}")]
    MalformedSessionRecord {
        /// What was wrong with the record.
        reason: &'static str,
    },
}
