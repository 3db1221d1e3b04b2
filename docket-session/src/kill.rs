//! Session matchers for administrative kill/inspect sweeps.
//!
//! An administrator kills or inspects sessions by pattern: everything,
//! or an explicit set of session IDs. The catalog evaluates the matcher
//! against each entry's ID during [`scan_sessions`] and hands matching
//! entries to the worker.
//!
//! [`scan_sessions`]: crate::SessionCatalog::scan_sessions

use std::collections::HashSet;

use docket_core::SessionId;

/// Predicate over session IDs for bulk catalog sweeps.
#[derive(Debug, Clone)]
pub enum SessionMatcher {
    /// Matches every session in the catalog.
    All,
    /// Matches exactly the listed sessions.
    ByIds(HashSet<SessionId>),
}

impl SessionMatcher {
    /// Builds a matcher over an explicit set of session IDs.
    #[must_use]
    pub fn by_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = SessionId>,
    {
        Self::ByIds(ids.into_iter().collect())
    }

    /// Returns true if `session_id` matches this pattern.
    #[must_use]
    pub fn matches(&self, session_id: SessionId) -> bool {
        match self {
            Self::All => true,
            Self::ByIds(ids) => ids.contains(&session_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_matches_everything() {
        let matcher = SessionMatcher::All;
        assert!(matcher.matches(SessionId::new(1)));
        assert!(matcher.matches(SessionId::new(999)));
    }

    #[test]
    fn test_by_ids_matches_only_listed() {
        let matcher = SessionMatcher::by_ids([SessionId::new(1), SessionId::new(3)]);
        assert!(matcher.matches(SessionId::new(1)));
        assert!(!matcher.matches(SessionId::new(2)));
        assert!(matcher.matches(SessionId::new(3)));
    }

    #[test]
    fn test_empty_id_set_matches_nothing() {
        let matcher = SessionMatcher::by_ids([]);
        assert!(!matcher.matches(SessionId::new(1)));
    }
}
