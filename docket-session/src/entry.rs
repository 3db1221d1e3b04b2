//! Per-session catalog entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use docket_core::SessionId;
use docket_runtime::OperationContext;

use crate::participant::ParticipantState;

/// The runtime record for one session.
///
/// Entries are shared between the catalog map and any live holder, so an
/// entry outlives its removal from the map while someone still uses it.
///
/// # Synchronization
///
/// `checked_out` is written only while holding the catalog mutex; the
/// atomic exists so the shared entry can carry the flag at all, not to
/// permit lock-free transitions. The participant state and the
/// current-operation pointer carry their own locks and may be touched
/// without the catalog mutex.
pub struct SessionEntry {
    id: SessionId,
    participant: ParticipantState,
    checked_out: AtomicBool,
    available_cv: Arc<Condvar>,
    current_operation: Mutex<Option<Weak<OperationContext>>>,
}

impl SessionEntry {
    pub(crate) fn new(id: SessionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            participant: ParticipantState::new(),
            checked_out: AtomicBool::new(false),
            available_cv: Arc::new(Condvar::new()),
            current_operation: Mutex::new(None),
        })
    }

    /// Returns the session this entry belongs to.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the session's transaction participant state.
    #[must_use]
    pub fn participant(&self) -> &ParticipantState {
        &self.participant
    }

    /// Returns true if some operation currently holds this session.
    #[must_use]
    pub fn is_checked_out(&self) -> bool {
        self.checked_out.load(Ordering::Acquire)
    }

    /// Returns the operation currently executing against this session,
    /// if it is still alive.
    #[must_use]
    pub fn current_operation(&self) -> Option<Arc<OperationContext>> {
        self.current_operation
            .lock()
            .expect("current operation pointer poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Caller must hold the catalog mutex.
    pub(crate) fn set_checked_out(&self, checked_out: bool) {
        self.checked_out.store(checked_out, Ordering::Release);
    }

    pub(crate) fn available_cv(&self) -> &Arc<Condvar> {
        &self.available_cv
    }

    pub(crate) fn set_current_operation(&self, op: &Arc<OperationContext>) {
        *self
            .current_operation
            .lock()
            .expect("current operation pointer poisoned") = Some(Arc::downgrade(op));
    }

    pub(crate) fn clear_current_operation(&self) {
        *self
            .current_operation
            .lock()
            .expect("current operation pointer poisoned") = None;
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .field("checked_out", &self.is_checked_out())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_runtime::ServiceContext;

    #[test]
    fn test_new_entry_is_idle() {
        let entry = SessionEntry::new(SessionId::new(1));
        assert_eq!(entry.id(), SessionId::new(1));
        assert!(!entry.is_checked_out());
        assert!(entry.current_operation().is_none());
    }

    #[test]
    fn test_current_operation_round_trip() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let op = client.make_session_operation(SessionId::new(1), None);

        let entry = SessionEntry::new(SessionId::new(1));
        entry.set_current_operation(&op);
        let bound = entry.current_operation().unwrap();
        assert_eq!(bound.id(), op.id());

        entry.clear_current_operation();
        assert!(entry.current_operation().is_none());
    }

    #[test]
    fn test_current_operation_does_not_keep_op_alive() {
        let service = ServiceContext::new();
        let client = service.make_client();
        let entry = SessionEntry::new(SessionId::new(1));

        {
            let op = client.make_session_operation(SessionId::new(1), None);
            entry.set_current_operation(&op);
        }
        // The operation is gone; the weak pointer must not resurrect it.
        assert!(entry.current_operation().is_none());
    }
}
