//! Scoped session check-out.

use std::sync::Arc;

use docket_core::SessionId;
use docket_runtime::ServiceContext;

use crate::catalog::SessionCatalog;
use crate::entry::SessionEntry;

/// Exclusive ownership of a session for the duration of one operation.
///
/// The handle is move-only: transferring it transfers the right to use
/// the session, and exactly one release happens when the final owner
/// drops it. It must be dropped before the operation it was checked out
/// for ends; the operation binding enforces this.
pub struct ScopedCheckedOutSession {
    /// Keeps the service (and with it the catalog) alive for the
    /// release in `drop`.
    service: Arc<ServiceContext>,
    entry: Arc<SessionEntry>,
}

impl ScopedCheckedOutSession {
    pub(crate) fn new(service: Arc<ServiceContext>, entry: Arc<SessionEntry>) -> Self {
        Self { service, entry }
    }

    /// Returns the checked-out session entry.
    #[must_use]
    pub fn entry(&self) -> &Arc<SessionEntry> {
        &self.entry
    }

    /// Returns the ID of the checked-out session.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.entry.id()
    }
}

impl Drop for ScopedCheckedOutSession {
    fn drop(&mut self) {
        // Takes the catalog mutex; the holder must not be under the
        // client lock here (see the binding's drop order).
        SessionCatalog::get(&self.service).release(self.entry.id());
    }
}

impl std::fmt::Debug for ScopedCheckedOutSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCheckedOutSession")
            .field("session_id", &self.entry.id())
            .finish()
    }
}
