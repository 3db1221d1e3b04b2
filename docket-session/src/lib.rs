//! Docket Session - session coordination for the Docket server.
//!
//! Every operation that carries a session ID routes through the
//! [`SessionCatalog`]: it borrows its session exclusively before touching
//! transaction state, and returns it when it finishes. The catalog is
//! the synchronization substrate that makes retryable writes and
//! multi-statement transactions safe.
//!
//! # Pieces
//!
//! - [`SessionCatalog`]: the process-wide registry and check-out gate
//! - [`SessionEntry`]: per-session runtime record
//! - [`ScopedCheckedOutSession`]: exclusive ownership of one session
//! - [`QuiesceGuard`]: drains check-outs for replication role changes
//! - [`OperationSession`]: binds a checked-out session to an operation
//! - [`ParticipantState`]: the session's transaction participant state
//! - [`CommitCoordinator`]: two-phase commit across shard participants
//!
//! # Ordering guarantees
//!
//! Within one session, check-outs serialize: releases happen-before the
//! next check-out of the same session. Across sessions nothing is
//! ordered. After [`QuiesceGuard::wait_for_drain`] returns, no session
//! is in use and none can be checked out until the barrier drops.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod binding;
mod catalog;
mod checkout;
mod coordinator;
mod entry;
mod error;
mod kill;
mod participant;
mod quiesce;
mod record;
mod table;

pub use binding::OperationSession;
pub use catalog::SessionCatalog;
pub use checkout::ScopedCheckedOutSession;
pub use coordinator::{
    CommitCoordinator, CoordinatorAction, CoordinatorError, CoordinatorResult, CoordinatorState,
};
pub use entry::SessionEntry;
pub use error::{SessionError, SessionResult};
pub use kill::SessionMatcher;
pub use participant::{ParticipantError, ParticipantResult, ParticipantState};
pub use quiesce::QuiesceGuard;
pub use record::{decode_session_record, encode_session_record};
pub use table::{
    InMemoryTableStore, TableError, TransactionTableStore, TRANSACTION_TABLE_NAMESPACE,
};
