//! Service, client, and operation contexts.
//!
//! A running Docket service is modelled as a tree of containers:
//!
//! ```text
//! ServiceContext (process-wide)
//!   └── Client (one per logical connection)
//!         └── OperationContext (one per in-flight operation)
//! ```
//!
//! Subsystem state attaches to a container through its [`Decorations`];
//! the runtime crate itself knows nothing about sessions or routing.

use std::any::Any;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use docket_core::{OperationId, SessionId, TxnNumber};

use crate::decoration::Decorations;
use crate::interrupt::InterruptState;

/// The replication role of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMode {
    /// Not replicated; a single standalone node.
    Standalone,
    /// Member of a replica set.
    ReplicaSet,
}

/// Process-wide state for one running Docket service.
///
/// Two `ServiceContext`s are fully independent: decorations attached to
/// one are invisible to the other. Tests rely on this to run isolated
/// catalogs side by side.
pub struct ServiceContext {
    /// Back-reference to the owning `Arc`, so contexts created from
    /// `&self` can hold the service alive.
    self_ref: Weak<Self>,
    decorations: Decorations,
    replication: RwLock<ReplicationMode>,
    next_operation_id: AtomicU64,
}

impl ServiceContext {
    /// Creates a new standalone service context.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            decorations: Decorations::new(),
            replication: RwLock::new(ReplicationMode::Standalone),
            next_operation_id: AtomicU64::new(1),
        })
    }

    /// Returns the service-level decoration registry.
    #[must_use]
    pub fn decorations(&self) -> &Decorations {
        &self.decorations
    }

    /// Returns the node's current replication role.
    #[must_use]
    pub fn replication_mode(&self) -> ReplicationMode {
        *self.replication.read().expect("replication mode poisoned")
    }

    /// Sets the node's replication role.
    ///
    /// Role transitions themselves (step-up, step-down) are driven by the
    /// replication subsystem; this just records the outcome.
    pub fn set_replication_mode(&self, mode: ReplicationMode) {
        *self.replication.write().expect("replication mode poisoned") = mode;
    }

    /// Creates a new client bound to this service.
    #[must_use]
    pub fn make_client(&self) -> Arc<Client> {
        Arc::new_cyclic(|self_ref| Client {
            self_ref: self_ref.clone(),
            service: self.shared(),
            inner: Mutex::new(ClientInner {
                in_direct_client: false,
                checked_out_session: None,
            }),
        })
    }

    fn shared(&self) -> Arc<Self> {
        self.self_ref
            .upgrade()
            .expect("service context used after its last reference dropped")
    }

    fn allocate_operation_id(&self) -> OperationId {
        OperationId::new(self.next_operation_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// One logical client connection.
///
/// The client owns the outermost lock of the server. Rules:
///
/// - The client lock is acquired *outside* any subsystem mutex when the
///   caller initiates the locking (for example when parking a checked-out
///   session on the client).
/// - Code already holding a subsystem mutex may acquire a client lock,
///   but must not wait while holding it.
/// - Consequently, values parked under the client lock whose destructors
///   take a subsystem mutex must be moved out under the lock and dropped
///   *after* the lock is released.
pub struct Client {
    /// Back-reference to the owning `Arc`, so operations created from
    /// `&self` can hold the client alive.
    self_ref: Weak<Self>,
    service: Arc<ServiceContext>,
    inner: Mutex<ClientInner>,
}

impl Client {
    /// Returns the owning service context.
    #[must_use]
    pub fn service(&self) -> &Arc<ServiceContext> {
        &self.service
    }

    /// Acquires the client lock.
    #[must_use]
    pub fn lock(&self) -> MutexGuard<'_, ClientInner> {
        self.inner.lock().expect("client lock poisoned")
    }

    /// Returns true if this client is executing a nested internal
    /// command on behalf of an outer operation.
    #[must_use]
    pub fn is_in_direct_client(&self) -> bool {
        self.lock().in_direct_client
    }

    /// Marks this client as entering or leaving nested internal command
    /// execution.
    pub fn set_in_direct_client(&self, nested: bool) {
        self.lock().in_direct_client = nested;
    }

    /// Creates an operation that carries no session.
    #[must_use]
    pub fn make_operation(&self) -> Arc<OperationContext> {
        self.make_operation_inner(None, None)
    }

    /// Creates an operation bound to a session, and optionally to a
    /// transaction within that session.
    #[must_use]
    pub fn make_session_operation(
        &self,
        session_id: SessionId,
        txn_number: Option<TxnNumber>,
    ) -> Arc<OperationContext> {
        self.make_operation_inner(Some(session_id), txn_number)
    }

    fn make_operation_inner(
        &self,
        session_id: Option<SessionId>,
        txn_number: Option<TxnNumber>,
    ) -> Arc<OperationContext> {
        let client = self
            .self_ref
            .upgrade()
            .expect("client used after its last reference dropped");
        Arc::new(OperationContext {
            id: self.service.allocate_operation_id(),
            client,
            session_id,
            txn_number,
            decorations: Decorations::new(),
            interrupt: Mutex::new(InterruptState::default()),
            storage_lock_depth: AtomicU32::new(0),
        })
    }
}

/// Client state guarded by the client lock.
pub struct ClientInner {
    in_direct_client: bool,
    /// Slot for the session checked out by the client's active operation.
    ///
    /// Stored type-erased so the runtime does not depend on the session
    /// crate; the session crate downcasts on access.
    checked_out_session: Option<Box<dyn Any + Send>>,
}

impl ClientInner {
    /// Returns true if a checked-out session is parked on this client.
    #[must_use]
    pub fn has_checked_out_session(&self) -> bool {
        self.checked_out_session.is_some()
    }

    /// Parks a checked-out session on this client.
    ///
    /// # Panics
    ///
    /// Panics if a session is already parked; double-binding is a
    /// programmer error.
    pub fn put_checked_out_session(&mut self, session: Box<dyn Any + Send>) {
        assert!(
            self.checked_out_session.is_none(),
            "operation already has a checked-out session"
        );
        self.checked_out_session = Some(session);
    }

    /// Removes and returns the parked session, if any.
    ///
    /// The caller must drop the returned value only after releasing the
    /// client lock; its destructor takes the catalog mutex.
    pub fn take_checked_out_session(&mut self) -> Option<Box<dyn Any + Send>> {
        self.checked_out_session.take()
    }

    /// Returns a borrow of the parked session, if any.
    #[must_use]
    pub fn checked_out_session(&self) -> Option<&(dyn Any + Send)> {
        self.checked_out_session.as_deref()
    }
}

/// One in-flight operation.
///
/// Immutable identity (operation ID, session ID, transaction number) is
/// fixed at construction; interrupt state and decorations are internally
/// synchronized, so the context is shared freely across threads.
pub struct OperationContext {
    id: OperationId,
    client: Arc<Client>,
    session_id: Option<SessionId>,
    txn_number: Option<TxnNumber>,
    decorations: Decorations,
    interrupt: Mutex<InterruptState>,
    storage_lock_depth: AtomicU32,
}

impl OperationContext {
    /// Returns the operation's unique ID.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the owning client.
    #[must_use]
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Returns the owning service context.
    #[must_use]
    pub fn service(&self) -> &Arc<ServiceContext> {
        self.client.service()
    }

    /// Returns the session this operation belongs to, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Returns the transaction number this operation belongs to, if any.
    #[must_use]
    pub fn txn_number(&self) -> Option<TxnNumber> {
        self.txn_number
    }

    /// Returns the operation-level decoration registry.
    #[must_use]
    pub fn decorations(&self) -> &Decorations {
        &self.decorations
    }

    /// Records that the operation acquired a storage-engine lock.
    pub fn track_storage_lock_acquired(&self) {
        self.storage_lock_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that the operation released a storage-engine lock.
    pub fn track_storage_lock_released(&self) {
        let previous = self.storage_lock_depth.fetch_sub(1, Ordering::Relaxed);
        assert!(previous > 0, "storage lock released more times than acquired");
    }

    /// Returns true if the operation currently holds storage-engine
    /// locks. Catalog waits assert this is false.
    #[must_use]
    pub fn holds_storage_locks(&self) -> bool {
        self.storage_lock_depth.load(Ordering::Relaxed) > 0
    }

    pub(crate) fn interrupt_state(&self) -> MutexGuard<'_, InterruptState> {
        self.interrupt.lock().expect("interrupt state poisoned")
    }
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("txn_number", &self.txn_number)
            .finish_non_exhaustive()
    }
}
