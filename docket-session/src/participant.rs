//! Per-session transaction participant state.
//!
//! Each session entry owns one `ParticipantState`: the record of the
//! session's retryable-write history and multi-statement-transaction
//! progress on this node. The catalog treats it as opaque except for
//! [`ParticipantState::invalidate`], which it may call on any entry while
//! holding the catalog mutex, concurrently with the session's holder.
//!
//! # Hydration
//!
//! A fresh or invalidated participant holds no authoritative state: it
//! must be hydrated from the durable transaction table before any
//! transaction operation. Invalidation just lowers the hydrated flag;
//! the holder observes it at its next operation and re-hydrates. This is
//! what makes invalidate-while-checked-out safe.

use std::collections::HashSet;
use std::sync::Mutex;

use docket_core::{StatementId, TxnNumber};
use thiserror::Error;

/// Result type for participant operations.
pub type ParticipantResult<T> = Result<T, ParticipantError>;

/// Errors from transaction participant operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantError {
    /// The participant must be hydrated from the transaction table
    /// before use.
    #[error("session state must be hydrated from the transaction table before use")]
    NotHydrated,

    /// A transaction with a number lower than the session's current one
    /// cannot be started or continued.
    #[error("cannot start transaction {requested}: session already at {current}")]
    TxnNumberTooOld {
        /// The transaction number the operation carried.
        requested: TxnNumber,
        /// The highest transaction number the session has seen.
        current: TxnNumber,
    },
}

/// Internally-synchronized transaction state for one session.
///
/// The holder of the session's check-out uses this freely; the catalog
/// only ever calls [`invalidate`](Self::invalidate). Both paths go
/// through the participant's own mutex, which is never held across a
/// wait.
#[derive(Debug, Default)]
pub struct ParticipantState {
    inner: Mutex<ParticipantInner>,
}

#[derive(Debug, Default)]
struct ParticipantInner {
    /// False until `hydrate` loads state from the transaction table,
    /// and again after every `invalidate`.
    hydrated: bool,
    /// Highest transaction number this session has seen.
    active_txn: Option<TxnNumber>,
    /// Statements already committed for the active retryable write.
    committed_statements: HashSet<StatementId>,
}

impl ParticipantState {
    /// Creates an un-hydrated participant.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all in-memory state and forces re-hydration.
    ///
    /// Idempotent, and safe to call while another thread is using the
    /// participant: the flag is observed at the next operation.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.hydrated = false;
        inner.active_txn = None;
        inner.committed_statements.clear();
    }

    /// Returns true if the participant holds authoritative state.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lock().hydrated
    }

    /// Loads state from the durable transaction table.
    pub fn hydrate<I>(&self, active_txn: Option<TxnNumber>, committed_statements: I)
    where
        I: IntoIterator<Item = StatementId>,
    {
        let mut inner = self.lock();
        inner.hydrated = true;
        inner.active_txn = active_txn;
        inner.committed_statements = committed_statements.into_iter().collect();
    }

    /// Starts a new transaction or continues the active one.
    ///
    /// A newer transaction number supersedes the active transaction and
    /// clears its statement history; the same number continues it.
    ///
    /// # Errors
    ///
    /// Returns [`ParticipantError::NotHydrated`] if the participant has
    /// not been hydrated, or [`ParticipantError::TxnNumberTooOld`] if
    /// `txn_number` is below the session's current transaction.
    pub fn begin_or_continue(&self, txn_number: TxnNumber) -> ParticipantResult<()> {
        let mut inner = self.lock();
        if !inner.hydrated {
            return Err(ParticipantError::NotHydrated);
        }
        match inner.active_txn {
            Some(current) if txn_number < current => Err(ParticipantError::TxnNumberTooOld {
                requested: txn_number,
                current,
            }),
            Some(current) if txn_number == current => Ok(()),
            _ => {
                inner.active_txn = Some(txn_number);
                inner.committed_statements.clear();
                Ok(())
            }
        }
    }

    /// Returns the session's active transaction number, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ParticipantError::NotHydrated`] if the participant has
    /// not been hydrated.
    pub fn active_txn_number(&self) -> ParticipantResult<Option<TxnNumber>> {
        let inner = self.lock();
        if !inner.hydrated {
            return Err(ParticipantError::NotHydrated);
        }
        Ok(inner.active_txn)
    }

    /// Returns true if `statement_id` already committed in the active
    /// transaction, so a retry must not re-execute it.
    ///
    /// # Errors
    ///
    /// Returns [`ParticipantError::NotHydrated`] if the participant has
    /// not been hydrated.
    pub fn statement_executed(&self, statement_id: StatementId) -> ParticipantResult<bool> {
        let inner = self.lock();
        if !inner.hydrated {
            return Err(ParticipantError::NotHydrated);
        }
        Ok(inner.committed_statements.contains(&statement_id))
    }

    /// Records that `statement_id` committed in the active transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ParticipantError::NotHydrated`] if the participant has
    /// not been hydrated.
    pub fn record_statement(&self, statement_id: StatementId) -> ParticipantResult<()> {
        let mut inner = self.lock();
        if !inner.hydrated {
            return Err(ParticipantError::NotHydrated);
        }
        inner.committed_statements.insert(statement_id);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ParticipantInner> {
        self.inner.lock().expect("participant state poisoned")
    }
}
