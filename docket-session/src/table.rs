//! Durable transaction table access.
//!
//! The catalog does not persist anything itself, but on replication
//! step-up it must make sure the durable transaction table exists before
//! any session state is written down. The storage engine is behind a
//! trait so the catalog can be exercised without one.

use std::collections::HashSet;
use std::sync::Mutex;

use thiserror::Error;

/// Namespace of the durable session-transactions table.
pub const TRANSACTION_TABLE_NAMESPACE: &str = "config.transactions";

/// Errors from transaction table storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The namespace already exists. Step-up treats this as success.
    #[error("namespace {namespace} already exists")]
    NamespaceExists {
        /// The existing namespace.
        namespace: String,
    },

    /// The storage engine failed to create the table.
    #[error("{message}")]
    CreateFailed {
        /// The storage engine's error.
        message: String,
    },
}

/// Storage-side handle for the durable transaction table.
pub trait TransactionTableStore: Send + Sync {
    /// Creates the table under `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::NamespaceExists`] if the table is already
    /// there, or [`TableError::CreateFailed`] for any other storage
    /// failure.
    fn create_table(&self, namespace: &str) -> Result<(), TableError>;
}

/// In-memory table store for tests and standalone tooling.
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    tables: Mutex<HashSet<String>>,
    fail_with: Mutex<Option<String>>,
}

impl InMemoryTableStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `create_table` fail with `message`.
    pub fn fail_creates_with(&self, message: &str) {
        *self.fail_with.lock().expect("table store poisoned") = Some(message.to_string());
    }

    /// Returns true if `namespace` has been created.
    #[must_use]
    pub fn has_table(&self, namespace: &str) -> bool {
        self.tables
            .lock()
            .expect("table store poisoned")
            .contains(namespace)
    }
}

impl TransactionTableStore for InMemoryTableStore {
    fn create_table(&self, namespace: &str) -> Result<(), TableError> {
        if let Some(message) = self.fail_with.lock().expect("table store poisoned").clone() {
            return Err(TableError::CreateFailed { message });
        }
        let mut tables = self.tables.lock().expect("table store poisoned");
        if !tables.insert(namespace.to_string()) {
            return Err(TableError::NamespaceExists {
                namespace: namespace.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_exists() {
        let store = InMemoryTableStore::new();
        assert!(store.create_table(TRANSACTION_TABLE_NAMESPACE).is_ok());
        assert!(store.has_table(TRANSACTION_TABLE_NAMESPACE));

        let err = store.create_table(TRANSACTION_TABLE_NAMESPACE).unwrap_err();
        assert!(matches!(err, TableError::NamespaceExists { .. }));
    }

    #[test]
    fn test_injected_failure() {
        let store = InMemoryTableStore::new();
        store.fail_creates_with("disk full");
        let err = store.create_table(TRANSACTION_TABLE_NAMESPACE).unwrap_err();
        assert_eq!(
            err,
            TableError::CreateFailed {
                message: "disk full".to_string()
            }
        );
    }
}
