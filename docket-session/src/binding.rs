//! Binding a checked-out session to an operation.
//!
//! Commands do not call the catalog directly: they construct an
//! [`OperationSession`] at the top of execution and let it check the
//! session out, park it on the client, and point the entry back at the
//! operation. Dropping the binding undoes all of that in the right
//! order.
//!
//! # Nested internal commands
//!
//! A command that runs internal queries re-enters this path on the same
//! client while the session is already checked out. The client's
//! direct-client flag marks that window: a binding constructed inside it
//! is a no-op on both construction and drop, and the outer binding keeps
//! sole ownership of the check-out.

use std::sync::Arc;

use docket_runtime::OperationContext;

use crate::catalog::SessionCatalog;
use crate::checkout::ScopedCheckedOutSession;
use crate::entry::SessionEntry;
use crate::error::SessionResult;

/// Scoped binding between an operation and its checked-out session.
pub struct OperationSession {
    op: Arc<OperationContext>,
    /// True only for the binding that performed the check-out; inert and
    /// nested bindings never touch the client slot on drop.
    owns_checkout: bool,
}

impl OperationSession {
    /// Checks out the operation's session and binds it to the
    /// operation.
    ///
    /// Does nothing if the operation carries no session, if the caller
    /// opts out with `check_out = false`, or if this is a nested
    /// internal command and the session is already checked out.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Interrupted`] if the operation is killed
    /// or deadlined while waiting for the session.
    ///
    /// # Panics
    ///
    /// Panics if a session is already checked out on this client and the
    /// client is not in a nested internal command.
    ///
    /// [`SessionError::Interrupted`]: crate::SessionError::Interrupted
    pub fn start(op: &Arc<OperationContext>, check_out: bool) -> SessionResult<Self> {
        let inert = Self {
            op: Arc::clone(op),
            owns_checkout: false,
        };

        let Some(session_id) = op.session_id() else {
            return Ok(inert);
        };
        if !check_out {
            return Ok(inert);
        }

        if op.client().lock().has_checked_out_session() {
            // The only legitimate way to arrive here with a session
            // already checked out is a nested internal command.
            assert!(
                op.client().is_in_direct_client(),
                "nested session check-out outside an internal client"
            );
            return Ok(inert);
        }

        let catalog = SessionCatalog::for_operation(op);
        let checked_out = catalog.check_out(op)?;
        assert!(
            checked_out.session_id() == session_id,
            "checked out a session other than the operation's"
        );
        let entry = Arc::clone(checked_out.entry());

        // Client lock is taken outside the catalog mutex, and only to
        // park the guard; check_out itself ran without it.
        op.client().lock().put_checked_out_session(Box::new(checked_out));
        entry.set_current_operation(op);

        Ok(Self {
            op: Arc::clone(op),
            owns_checkout: true,
        })
    }

    /// Returns the session entry bound to `op`, if one is checked out.
    #[must_use]
    pub fn current(op: &OperationContext) -> Option<Arc<SessionEntry>> {
        let client = op.client().lock();
        client
            .checked_out_session()
            .and_then(|any| any.downcast_ref::<ScopedCheckedOutSession>())
            .map(|scoped| Arc::clone(scoped.entry()))
    }
}

impl Drop for OperationSession {
    fn drop(&mut self) {
        // Inert and nested bindings release nothing; only the binding
        // that performed the check-out owns the slot.
        if !self.owns_checkout || self.op.client().is_in_direct_client() {
            return;
        }

        let taken = {
            let mut client = self.op.client().lock();
            client.take_checked_out_session()
        };

        // The guard leaves the client under the client lock, but is
        // dropped only after the lock is released: releasing takes the
        // catalog mutex, and other code takes the client lock while
        // holding that mutex. Reversing the order would deadlock.
        if let Some(boxed) = taken {
            let scoped = boxed
                .downcast::<ScopedCheckedOutSession>()
                .expect("client session slot holds a foreign type");
            scoped.entry().clear_current_operation();
            drop(scoped);
        }
    }
}
