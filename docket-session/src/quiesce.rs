//! Catalog quiesce barrier.
//!
//! Replication role transitions need a window in which no operation is
//! using any session. The barrier closes the check-out gate on
//! construction, so new check-outs block, and lets the holder wait until
//! every outstanding check-out has been returned. Destroying the barrier
//! reopens the gate and wakes the blocked check-outs.

use std::sync::Arc;

use docket_runtime::OperationContext;
use tracing::debug;

use crate::catalog::SessionCatalog;
use crate::error::SessionResult;

/// Scoped closure of the session check-out gate.
///
/// Construction only stops new check-outs; the holder decides when (and
/// whether) to drain by calling [`wait_for_drain`](Self::wait_for_drain).
/// Barriers do not nest: constructing one while another is live is a
/// programmer error.
pub struct QuiesceGuard {
    catalog: Arc<SessionCatalog>,
}

impl QuiesceGuard {
    /// Closes the check-out gate of `catalog`.
    ///
    /// # Panics
    ///
    /// Panics if the gate is already closed by another barrier.
    #[must_use]
    pub fn new(catalog: Arc<SessionCatalog>) -> Self {
        {
            let mut inner = catalog.lock_inner();
            assert!(inner.allow_checkout, "quiesce barriers do not nest");
            inner.allow_checkout = false;
        }
        debug!("Session check-outs disabled");
        Self { catalog }
    }

    /// Blocks until every checked-out session has been checked back in.
    ///
    /// On return, and until this barrier is dropped, no session is in
    /// use and no new check-out can start.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Interrupted`] if the operation is killed
    /// or deadlined while waiting.
    ///
    /// [`SessionError::Interrupted`]: crate::SessionError::Interrupted
    pub fn wait_for_drain(&self, op: &OperationContext) -> SessionResult<()> {
        let inner = self.catalog.lock_inner();
        assert!(!inner.allow_checkout, "drain wait without a closed gate");
        let inner = op.wait_for_condition_or_interrupt(
            self.catalog.all_checked_in_cv(),
            inner,
            |state| state.num_checked_out == 0,
        )?;
        drop(inner);
        debug!("All sessions checked in");
        Ok(())
    }
}

impl Drop for QuiesceGuard {
    fn drop(&mut self) {
        let mut inner = self.catalog.lock_inner();
        assert!(!inner.allow_checkout, "quiesce gate reopened behind the barrier");
        inner.allow_checkout = true;
        drop(inner);
        self.catalog.checkout_allowed_cv().notify_all();
        debug!("Session check-outs re-enabled");
    }
}
