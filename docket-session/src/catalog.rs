//! The session catalog.
//!
//! The catalog is the process-wide registry of session runtime state and
//! the gatekeeper for exclusive session check-out: every operation that
//! carries a session ID borrows its session here before touching any
//! transaction state, and at most one operation holds a given session at
//! a time.
//!
//! # Synchronization
//!
//! One mutex guards the whole catalog: the session map, the check-out
//! gate, the checked-out count, and every entry's checked-out flag. The
//! only suspension points are the two waits inside [`check_out`]
//! (the gate and the per-session availability) and
//! [`QuiesceGuard::wait_for_drain`]; both are interruptible and release
//! the mutex while sleeping. Everything else the catalog does is
//! non-blocking under the mutex.
//!
//! Callers must not hold storage-engine locks when entering the catalog;
//! waits would then block storage for an unbounded time. This is
//! asserted, not returned.
//!
//! [`check_out`]: SessionCatalog::check_out
//! [`QuiesceGuard::wait_for_drain`]: crate::QuiesceGuard::wait_for_drain

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use docket_core::SessionId;
use docket_runtime::{OperationContext, ReplicationMode, ServiceContext};
use tracing::{debug, info};

use crate::checkout::ScopedCheckedOutSession;
use crate::entry::SessionEntry;
use crate::error::{SessionError, SessionResult};
use crate::kill::SessionMatcher;
use crate::participant::ParticipantState;
use crate::record::decode_session_record;
use crate::table::{TableError, TransactionTableStore, TRANSACTION_TABLE_NAMESPACE};

/// Process-wide registry of session runtime state.
///
/// One catalog exists per [`ServiceContext`], attached as a decoration;
/// use [`SessionCatalog::get`] rather than constructing one.
pub struct SessionCatalog {
    inner: Mutex<CatalogInner>,
    /// Broadcast when the check-out gate reopens.
    checkout_allowed_cv: Arc<Condvar>,
    /// Broadcast when the checked-out count reaches zero.
    all_checked_in_cv: Arc<Condvar>,
}

pub(crate) struct CatalogInner {
    pub(crate) sessions: HashMap<SessionId, Arc<SessionEntry>>,
    /// The check-out gate; closed only by a live [`QuiesceGuard`].
    ///
    /// [`QuiesceGuard`]: crate::QuiesceGuard
    pub(crate) allow_checkout: bool,
    /// Number of entries currently checked out. Always equals the number
    /// of entries in `sessions` whose flag is set.
    pub(crate) num_checked_out: u64,
}

impl SessionCatalog {
    fn new() -> Self {
        Self {
            inner: Mutex::new(CatalogInner {
                sessions: HashMap::new(),
                allow_checkout: true,
                num_checked_out: 0,
            }),
            checkout_allowed_cv: Arc::new(Condvar::new()),
            all_checked_in_cv: Arc::new(Condvar::new()),
        }
    }

    /// Returns the catalog of `service`, creating it on first access.
    #[must_use]
    pub fn get(service: &ServiceContext) -> Arc<Self> {
        service.decorations().get_or_insert_with(Self::new)
    }

    /// Returns the catalog of the service `op` runs under.
    #[must_use]
    pub fn for_operation(op: &OperationContext) -> Arc<Self> {
        Self::get(op.service())
    }

    /// Checks out the session the operation is bound to, blocking until
    /// the session is available and check-outs are allowed.
    ///
    /// The entry is created on first use. Both waits are interruptible;
    /// an interrupted call leaves the catalog exactly as it found it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Interrupted`] if the operation is killed
    /// or deadlined while waiting.
    ///
    /// # Panics
    ///
    /// Panics if the operation holds storage-engine locks or carries no
    /// session ID.
    pub fn check_out(&self, op: &Arc<OperationContext>) -> SessionResult<ScopedCheckedOutSession> {
        assert!(
            !op.holds_storage_locks(),
            "cannot check out a session while holding storage locks"
        );
        let session_id = op
            .session_id()
            .expect("checking out a session requires an operation bound to a session");

        let mut inner = self.lock_inner();
        let entry = loop {
            inner = op.wait_for_condition_or_interrupt(
                &self.checkout_allowed_cv,
                inner,
                |state| state.allow_checkout,
            )?;

            // A freshly created entry is idle and the gate is open (both
            // verified under this same mutex hold), so creation always
            // reaches the check-out below: an interrupted call can never
            // leave behind an entry it created.
            let entry = Self::entry_or_create(&mut inner, session_id);

            // Wait until the session is free, or until a quiesce closes
            // the gate under us, in which case we go back to the gate.
            inner = op.wait_for_condition_or_interrupt(
                entry.available_cv(),
                inner,
                |state| !entry.is_checked_out() || !state.allow_checkout,
            )?;
            if inner.allow_checkout {
                break entry;
            }
        };

        assert!(!entry.is_checked_out(), "session became checked out under the mutex");
        entry.set_checked_out(true);
        inner.num_checked_out += 1;
        drop(inner);

        debug!(session_id = %session_id, op_id = %op.id(), "Checked out session");
        Ok(ScopedCheckedOutSession::new(Arc::clone(op.service()), entry))
    }

    /// Returns a shared, non-exclusive handle to the session's entry,
    /// creating it on first use.
    ///
    /// The entry is not checked out: the caller may read session
    /// metadata but has no claim on the transaction state.
    ///
    /// # Panics
    ///
    /// Panics if the operation holds storage-engine locks, or is itself
    /// bound to a session or transaction. This path is for
    /// administrative callers only; operations bound to a session must
    /// go through [`check_out`](Self::check_out).
    #[must_use]
    pub fn get_or_create(
        &self,
        op: &OperationContext,
        session_id: SessionId,
    ) -> Arc<SessionEntry> {
        assert!(
            !op.holds_storage_locks(),
            "cannot touch the session catalog while holding storage locks"
        );
        assert!(
            op.session_id().is_none(),
            "get_or_create is reserved for operations not bound to a session"
        );
        assert!(
            op.txn_number().is_none(),
            "get_or_create is reserved for operations not bound to a transaction"
        );

        let mut inner = self.lock_inner();
        Self::entry_or_create(&mut inner, session_id)
    }

    /// Invalidates session state, either for the single session named by
    /// a durable record or for every session in the catalog.
    ///
    /// Invalidated entries that are idle are erased; checked-out entries
    /// stay in the map so their holder can check them back in, carrying
    /// invalidated state until re-hydrated. Naming a session that is not
    /// in the catalog is a silent no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DirectWriteForbidden`] if this node is a
    /// replica-set member and `op` itself carries a session, or
    /// [`SessionError::MalformedSessionRecord`] if `single_record` does
    /// not carry a well-formed session ID.
    pub fn invalidate_sessions(
        &self,
        op: &OperationContext,
        single_record: Option<&[u8]>,
    ) -> SessionResult<()> {
        if op.service().replication_mode() == ReplicationMode::ReplicaSet {
            if let Some(session_id) = op.session_id() {
                return Err(SessionError::DirectWriteForbidden { session_id });
            }
        }

        if let Some(record) = single_record {
            let session_id = decode_session_record(record)?;
            let mut inner = self.lock_inner();
            if let Some(entry) = inner.sessions.get(&session_id) {
                entry.participant().invalidate();
                if !entry.is_checked_out() {
                    inner.sessions.remove(&session_id);
                }
                debug!(session_id = %session_id, "Invalidated session");
            }
        } else {
            let mut inner = self.lock_inner();
            let total = inner.sessions.len();
            // Checked-out entries cannot be erased: their holder expects
            // to find them here to check back in.
            inner.sessions.retain(|_, entry| {
                entry.participant().invalidate();
                entry.is_checked_out()
            });
            debug!(
                invalidated = total,
                retained = inner.sessions.len(),
                "Invalidated all sessions"
            );
        }
        Ok(())
    }

    /// Runs `worker` against the transaction state of every session the
    /// matcher selects.
    ///
    /// The worker executes with the catalog mutex held: it must not
    /// block on I/O or acquire a lock that can be held while entering
    /// the catalog.
    pub fn scan_sessions<F>(&self, op: &OperationContext, matcher: &SessionMatcher, mut worker: F)
    where
        F: FnMut(&OperationContext, &ParticipantState),
    {
        let inner = self.lock_inner();
        debug!(sessions = inner.sessions.len(), "Scanning sessions");
        for (session_id, entry) in &inner.sessions {
            if matcher.matches(*session_id) {
                worker(op, entry.participant());
            }
        }
    }

    /// Step-up hook: invalidates every session, then makes sure the
    /// durable transaction table exists.
    ///
    /// An already-existing table is success; the hook is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TableCreationFailed`] if the storage
    /// engine fails to create the table, or any error from
    /// [`invalidate_sessions`](Self::invalidate_sessions).
    pub fn on_step_up(
        &self,
        op: &OperationContext,
        store: &dyn TransactionTableStore,
    ) -> SessionResult<()> {
        self.invalidate_sessions(op, None)?;

        match store.create_table(TRANSACTION_TABLE_NAMESPACE) {
            Ok(()) => {
                info!(namespace = TRANSACTION_TABLE_NAMESPACE, "Created transaction table");
                Ok(())
            }
            Err(TableError::NamespaceExists { .. }) => Ok(()),
            Err(TableError::CreateFailed { message }) => Err(SessionError::TableCreationFailed {
                namespace: TRANSACTION_TABLE_NAMESPACE.to_string(),
                message,
            }),
        }
    }

    /// Returns the number of sessions currently checked out.
    #[must_use]
    pub fn num_checked_out(&self) -> u64 {
        self.lock_inner().num_checked_out
    }

    /// Returns the number of sessions in the catalog.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock_inner().sessions.len()
    }

    /// Checks a session back in and wakes one waiter.
    ///
    /// Invoked only from the scoped check-out's destructor. A checked-out
    /// entry is always in the map (invalidation never erases held
    /// entries), so absence here is a programmer error.
    pub(crate) fn release(&self, session_id: SessionId) {
        let mut inner = self.lock_inner();
        {
            let entry = inner
                .sessions
                .get(&session_id)
                .expect("released session is not in the catalog");
            assert!(entry.is_checked_out(), "released session was not checked out");
            entry.set_checked_out(false);
            entry.available_cv().notify_one();
        }
        inner.num_checked_out -= 1;
        if inner.num_checked_out == 0 {
            self.all_checked_in_cv.notify_all();
        }
        debug!(session_id = %session_id, "Checked in session");
    }

    fn entry_or_create(inner: &mut CatalogInner, session_id: SessionId) -> Arc<SessionEntry> {
        assert!(inner.allow_checkout, "session lookup while check-outs are disabled");
        Arc::clone(inner.sessions.entry(session_id).or_insert_with(|| {
            debug!(session_id = %session_id, "Created session entry");
            SessionEntry::new(session_id)
        }))
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, CatalogInner> {
        self.inner.lock().expect("session catalog mutex poisoned")
    }

    pub(crate) fn checkout_allowed_cv(&self) -> &Arc<Condvar> {
        &self.checkout_allowed_cv
    }

    pub(crate) fn all_checked_in_cv(&self) -> &Arc<Condvar> {
        &self.all_checked_in_cv
    }
}

impl Drop for SessionCatalog {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let inner = self.inner.get_mut().expect("session catalog mutex poisoned");
        for entry in inner.sessions.values() {
            assert!(
                !entry.is_checked_out(),
                "session catalog dropped with a checked-out session"
            );
        }
    }
}

impl std::fmt::Debug for SessionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("SessionCatalog")
            .field("sessions", &inner.sessions.len())
            .field("allow_checkout", &inner.allow_checkout)
            .field("num_checked_out", &inner.num_checked_out)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_session_record;
    use crate::table::InMemoryTableStore;
    use docket_core::TxnNumber;
    use docket_runtime::ServiceContext;

    fn test_service() -> Arc<ServiceContext> {
        ServiceContext::new()
    }

    #[test]
    fn test_catalog_is_per_service() {
        let service_a = test_service();
        let service_b = test_service();
        let catalog_a = SessionCatalog::get(&service_a);
        let catalog_b = SessionCatalog::get(&service_b);
        assert!(!Arc::ptr_eq(&catalog_a, &catalog_b));
        // Repeated access within one service returns the same catalog.
        assert!(Arc::ptr_eq(&catalog_a, &SessionCatalog::get(&service_a)));
    }

    #[test]
    fn test_check_out_and_release_counts() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_session_operation(SessionId::new(1), None);
        assert_eq!(catalog.num_checked_out(), 0);

        let checked_out = catalog.check_out(&op).unwrap();
        assert_eq!(catalog.num_checked_out(), 1);
        assert!(checked_out.entry().is_checked_out());

        drop(checked_out);
        assert_eq!(catalog.num_checked_out(), 0);
        // The entry survives release.
        assert_eq!(catalog.session_count(), 1);
    }

    #[test]
    fn test_reuse_returns_same_entry() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op_a = client.make_session_operation(SessionId::new(1), None);
        let first = catalog.check_out(&op_a).unwrap();
        let first_entry = Arc::clone(first.entry());
        drop(first);

        let op_b = client.make_session_operation(SessionId::new(1), None);
        let second = catalog.check_out(&op_b).unwrap();
        assert!(Arc::ptr_eq(&first_entry, second.entry()));
    }

    #[test]
    fn test_get_or_create_does_not_check_out() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let admin_op = client.make_operation();
        let entry = catalog.get_or_create(&admin_op, SessionId::new(9));
        assert!(!entry.is_checked_out());
        assert_eq!(catalog.num_checked_out(), 0);
        assert_eq!(catalog.session_count(), 1);
    }

    #[test]
    #[should_panic(expected = "reserved for operations not bound to a session")]
    fn test_get_or_create_rejects_session_operations() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_session_operation(SessionId::new(1), None);
        let _ = catalog.get_or_create(&op, SessionId::new(2));
    }

    #[test]
    #[should_panic(expected = "holding storage locks")]
    fn test_check_out_rejects_storage_locks() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_session_operation(SessionId::new(1), None);
        op.track_storage_lock_acquired();
        let _ = catalog.check_out(&op);
    }

    #[test]
    fn test_invalidate_idle_session_erases_entry() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_session_operation(SessionId::new(1), None);
        drop(catalog.check_out(&op).unwrap());
        assert_eq!(catalog.session_count(), 1);

        let admin_op = client.make_operation();
        let record = encode_session_record(SessionId::new(1));
        catalog.invalidate_sessions(&admin_op, Some(&record)).unwrap();
        assert_eq!(catalog.session_count(), 0);
    }

    #[test]
    fn test_invalidate_after_erase_creates_fresh_entry() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_session_operation(SessionId::new(1), None);
        let checked_out = catalog.check_out(&op).unwrap();
        let old_entry = Arc::clone(checked_out.entry());
        old_entry.participant().hydrate(Some(TxnNumber::new(1)), []);
        drop(checked_out);

        let admin_op = client.make_operation();
        catalog.invalidate_sessions(&admin_op, None).unwrap();

        let op_b = client.make_session_operation(SessionId::new(1), None);
        let fresh = catalog.check_out(&op_b).unwrap();
        assert!(!Arc::ptr_eq(&old_entry, fresh.entry()));
        assert!(!fresh.entry().participant().is_valid());
    }

    #[test]
    fn test_invalidate_while_checked_out_keeps_entry() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_session_operation(SessionId::new(1), None);
        let checked_out = catalog.check_out(&op).unwrap();
        checked_out.entry().participant().hydrate(None, []);

        let admin_op = client.make_operation();
        catalog.invalidate_sessions(&admin_op, None).unwrap();

        // The holder can still check the invalidated session back in.
        assert_eq!(catalog.session_count(), 1);
        assert!(!checked_out.entry().participant().is_valid());
        drop(checked_out);
        assert_eq!(catalog.num_checked_out(), 0);

        // A second invalidation pass erases the now-idle entry.
        catalog.invalidate_sessions(&admin_op, None).unwrap();
        assert_eq!(catalog.session_count(), 0);
    }

    #[test]
    fn test_invalidate_missing_session_is_noop() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let admin_op = client.make_operation();
        let record = encode_session_record(SessionId::new(404));
        assert!(catalog.invalidate_sessions(&admin_op, Some(&record)).is_ok());
    }

    #[test]
    fn test_invalidate_malformed_record_fails() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let admin_op = client.make_operation();
        let err = catalog
            .invalidate_sessions(&admin_op, Some(b"bogus"))
            .unwrap_err();
        assert!(matches!(err, SessionError::MalformedSessionRecord { .. }));
    }

    #[test]
    fn test_invalidate_rejects_session_operations_in_repl_set() {
        let service = test_service();
        service.set_replication_mode(ReplicationMode::ReplicaSet);
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_session_operation(SessionId::new(1), None);
        let err = catalog.invalidate_sessions(&op, None).unwrap_err();
        assert_eq!(
            err,
            SessionError::DirectWriteForbidden {
                session_id: SessionId::new(1)
            }
        );

        // Standalone nodes accept the same call.
        service.set_replication_mode(ReplicationMode::Standalone);
        assert!(catalog.invalidate_sessions(&op, None).is_ok());
    }

    #[test]
    fn test_scan_empty_catalog_runs_worker_zero_times() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_operation();
        let mut visits = 0;
        catalog.scan_sessions(&op, &SessionMatcher::All, |_, _| visits += 1);
        assert_eq!(visits, 0);
    }

    #[test]
    fn test_scan_visits_only_matching_sessions() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let admin_op = client.make_operation();
        for raw in 1..=3 {
            let _ = catalog.get_or_create(&admin_op, SessionId::new(raw));
        }

        let matcher = SessionMatcher::by_ids([SessionId::new(1), SessionId::new(3)]);
        let mut visits = 0;
        catalog.scan_sessions(&admin_op, &matcher, |_, _| visits += 1);
        assert_eq!(visits, 2);
    }

    #[test]
    fn test_step_up_creates_table_and_invalidates() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);
        let store = InMemoryTableStore::new();

        let admin_op = client.make_operation();
        let _ = catalog.get_or_create(&admin_op, SessionId::new(1));

        catalog.on_step_up(&admin_op, &store).unwrap();
        assert!(store.has_table(TRANSACTION_TABLE_NAMESPACE));
        // Idle sessions were invalidated and erased.
        assert_eq!(catalog.session_count(), 0);
    }

    #[test]
    fn test_step_up_with_existing_table_succeeds() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);
        let store = InMemoryTableStore::new();
        store.create_table(TRANSACTION_TABLE_NAMESPACE).unwrap();

        let admin_op = client.make_operation();
        assert!(catalog.on_step_up(&admin_op, &store).is_ok());
    }

    #[test]
    fn test_step_up_surfaces_storage_failure() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);
        let store = InMemoryTableStore::new();
        store.fail_creates_with("no space left on device");

        let admin_op = client.make_operation();
        let err = catalog.on_step_up(&admin_op, &store).unwrap_err();
        match err {
            SessionError::TableCreationFailed { namespace, message } => {
                assert_eq!(namespace, TRANSACTION_TABLE_NAMESPACE);
                assert!(message.contains("no space left"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_interrupted_check_out_leaves_catalog_unchanged() {
        let service = test_service();
        let client = service.make_client();
        let catalog = SessionCatalog::get(&service);

        let op = client.make_session_operation(SessionId::new(1), None);
        op.interrupt();

        // The session is free, so the call succeeds without waiting even
        // though the operation is killed: interruption only fires inside
        // an actual wait.
        let checked_out = catalog.check_out(&op).unwrap();
        drop(checked_out);

        // Held session plus killed waiter: the wait must fail and leave
        // the counters alone.
        let holder_op = client.make_session_operation(SessionId::new(1), None);
        let held = catalog.check_out(&holder_op).unwrap();
        let sessions_before = catalog.session_count();

        let killed_op = client.make_session_operation(SessionId::new(1), None);
        killed_op.interrupt();
        let err = catalog.check_out(&killed_op).unwrap_err();
        assert!(matches!(err, SessionError::Interrupted(_)));
        assert_eq!(catalog.num_checked_out(), 1);
        assert_eq!(catalog.session_count(), sessions_before);
        drop(held);
    }
}
