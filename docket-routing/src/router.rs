//! Per-operation transaction router.
//!
//! On the coordinating node, each multi-statement transaction owns one
//! `TransactionRouter`, bound to the operation that runs the
//! transaction's current statement. The router tracks which shards have
//! joined the transaction and rewrites every outgoing command so the
//! shard knows what transaction it is serving: the transaction number,
//! the statement position, whether this command opens the transaction on
//! that shard, and the read concern the transaction pinned at start.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use docket_core::{Limits, ShardId, StatementId, TxnNumber};
use docket_runtime::OperationContext;

use crate::sender::ShardRequest;

/// Read concern a transaction pins for all of its reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConcernLevel {
    /// Read the node's local view.
    Local,
    /// Read majority-committed data.
    Majority,
    /// Read from a single cluster-wide snapshot.
    Snapshot,
}

/// Transaction coordination fields attached to an outgoing command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnFields {
    /// The transaction this command belongs to.
    pub txn_number: TxnNumber,
    /// Position of the statement issuing this command.
    pub statement_id: StatementId,
    /// True on the first command a shard sees for this transaction.
    pub start_transaction: bool,
    /// Always false inside a multi-statement transaction.
    pub autocommit: bool,
    /// The transaction's read concern; attached only when starting the
    /// transaction on the shard.
    pub read_concern: Option<ReadConcernLevel>,
}

/// Per-shard participant record on the router.
#[derive(Debug, Clone, Copy)]
struct ParticipantEntry {
    /// The first participant coordinates the commit.
    is_coordinator: bool,
    /// True until the first command to this shard is confirmed sent.
    must_start_txn: bool,
    /// Set once a command has been delivered to this shard.
    command_sent: bool,
}

/// Routes one transaction's commands across its shard participants.
///
/// Bound to the transaction's operation as a decoration; fan-out code
/// finds it with [`TransactionRouter::get`] and treats its absence as
/// "not in a transaction".
pub struct TransactionRouter {
    txn_number: TxnNumber,
    read_concern: ReadConcernLevel,
    inner: Mutex<RouterInner>,
}

struct RouterInner {
    participants: HashMap<ShardId, ParticipantEntry>,
    coordinator_shard: Option<ShardId>,
    current_statement: StatementId,
}

impl TransactionRouter {
    /// Starts routing a transaction and binds the router to `op`.
    ///
    /// # Panics
    ///
    /// Panics if the operation carries no transaction number.
    pub fn begin(op: &OperationContext, read_concern: ReadConcernLevel) -> Arc<Self> {
        let txn_number = op
            .txn_number()
            .expect("starting a transaction router requires a transaction number");
        op.decorations().insert(Self {
            txn_number,
            read_concern,
            inner: Mutex::new(RouterInner {
                participants: HashMap::new(),
                coordinator_shard: None,
                current_statement: StatementId::new(0),
            }),
        })
    }

    /// Returns the router bound to `op`, if the operation is part of a
    /// multi-statement transaction.
    #[must_use]
    pub fn get(op: &OperationContext) -> Option<Arc<Self>> {
        op.decorations().get::<Self>()
    }

    /// Returns the transaction number this router coordinates.
    #[must_use]
    pub fn txn_number(&self) -> TxnNumber {
        self.txn_number
    }

    /// Returns the shard coordinating the commit, once one has joined.
    #[must_use]
    pub fn coordinator_shard(&self) -> Option<ShardId> {
        self.lock().coordinator_shard
    }

    /// Returns the number of shards participating so far.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.lock().participants.len()
    }

    /// Returns true if a command has been delivered to `shard_id`.
    #[must_use]
    pub fn is_command_sent(&self, shard_id: ShardId) -> bool {
        self.lock()
            .participants
            .get(&shard_id)
            .is_some_and(|p| p.command_sent)
    }

    /// Moves the router to the next statement of the transaction.
    pub fn advance_statement(&self) {
        let mut inner = self.lock();
        inner.current_statement = StatementId::new(inner.current_statement.get() + 1);
    }

    /// Rewrites `request` with the transaction fields its target shard
    /// requires, registering the shard as a participant if this is its
    /// first command.
    #[must_use]
    pub fn attach_txn_fields(&self, request: ShardRequest) -> ShardRequest {
        let mut inner = self.lock();
        assert!(
            inner.participants.len() <= Limits::new().max_participants_per_txn as usize,
            "transaction exceeds the participant limit"
        );
        let is_first_participant = inner.participants.is_empty();
        let participant = inner
            .participants
            .entry(request.shard_id)
            .or_insert(ParticipantEntry {
                is_coordinator: is_first_participant,
                must_start_txn: true,
                command_sent: false,
            });

        let start_transaction = participant.must_start_txn;
        if participant.is_coordinator && inner.coordinator_shard.is_none() {
            inner.coordinator_shard = Some(request.shard_id);
        }

        ShardRequest {
            txn: Some(TxnFields {
                txn_number: self.txn_number,
                statement_id: inner.current_statement,
                start_transaction,
                autocommit: false,
                read_concern: start_transaction.then_some(self.read_concern),
            }),
            ..request
        }
    }

    /// Records that a command reached `shard_id`, so later commands to
    /// that shard no longer open the transaction.
    pub fn mark_command_sent(&self, shard_id: ShardId) {
        let mut inner = self.lock();
        if let Some(participant) = inner.participants.get_mut(&shard_id) {
            participant.command_sent = true;
            participant.must_start_txn = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterInner> {
        self.inner.lock().expect("transaction router poisoned")
    }
}

impl std::fmt::Debug for TransactionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("TransactionRouter")
            .field("txn_number", &self.txn_number)
            .field("participants", &inner.participants.len())
            .field("coordinator_shard", &inner.coordinator_shard)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use docket_core::SessionId;
    use docket_runtime::ServiceContext;

    fn request(shard: u64) -> ShardRequest {
        ShardRequest {
            shard_id: ShardId::new(shard),
            body: Bytes::from_static(b"find"),
            txn: None,
        }
    }

    fn router_op() -> (Arc<TransactionRouter>, Arc<docket_runtime::OperationContext>) {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_session_operation(SessionId::new(1), Some(TxnNumber::new(7)));
        let router = TransactionRouter::begin(&op, ReadConcernLevel::Snapshot);
        (router, op)
    }

    #[test]
    fn test_absent_router_is_none() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_operation();
        assert!(TransactionRouter::get(&op).is_none());
    }

    #[test]
    fn test_bound_router_is_found() {
        let (router, op) = router_op();
        let found = TransactionRouter::get(&op).unwrap();
        assert!(Arc::ptr_eq(&router, &found));
        assert_eq!(found.txn_number(), TxnNumber::new(7));
    }

    #[test]
    fn test_first_attach_starts_transaction() {
        let (router, _op) = router_op();
        let rewritten = router.attach_txn_fields(request(1));
        let txn = rewritten.txn.unwrap();
        assert_eq!(txn.txn_number, TxnNumber::new(7));
        assert!(txn.start_transaction);
        assert!(!txn.autocommit);
        assert_eq!(txn.read_concern, Some(ReadConcernLevel::Snapshot));
    }

    #[test]
    fn test_attach_after_send_continues_transaction() {
        let (router, _op) = router_op();
        let _ = router.attach_txn_fields(request(1));
        router.mark_command_sent(ShardId::new(1));

        let rewritten = router.attach_txn_fields(request(1));
        let txn = rewritten.txn.unwrap();
        assert!(!txn.start_transaction);
        // Read concern is only attached when starting.
        assert_eq!(txn.read_concern, None);
    }

    #[test]
    fn test_unsent_participant_still_starts_transaction() {
        let (router, _op) = router_op();
        // Attached but never confirmed sent: the retry must still open
        // the transaction on the shard.
        let _ = router.attach_txn_fields(request(1));
        let rewritten = router.attach_txn_fields(request(1));
        assert!(rewritten.txn.unwrap().start_transaction);
    }

    #[test]
    fn test_first_participant_coordinates() {
        let (router, _op) = router_op();
        let _ = router.attach_txn_fields(request(3));
        let _ = router.attach_txn_fields(request(1));
        assert_eq!(router.coordinator_shard(), Some(ShardId::new(3)));
        assert_eq!(router.participant_count(), 2);
    }

    #[test]
    fn test_statement_id_advances() {
        let (router, _op) = router_op();
        let first = router.attach_txn_fields(request(1));
        assert_eq!(first.txn.unwrap().statement_id, StatementId::new(0));

        router.advance_statement();
        let second = router.attach_txn_fields(request(1));
        assert_eq!(second.txn.unwrap().statement_id, StatementId::new(1));
    }

    #[test]
    fn test_mark_command_sent_tracks_per_shard() {
        let (router, _op) = router_op();
        let _ = router.attach_txn_fields(request(1));
        let _ = router.attach_txn_fields(request(2));

        assert!(!router.is_command_sent(ShardId::new(1)));
        router.mark_command_sent(ShardId::new(1));
        assert!(router.is_command_sent(ShardId::new(1)));
        assert!(!router.is_command_sent(ShardId::new(2)));
    }
}
