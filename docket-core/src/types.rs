//! Strongly-typed identifiers for Docket entities.
//!
//! All IDs are 64-bit newtypes. A `SessionId` is opaque to everything
//! that handles it: the catalog only ever compares and hashes it, and
//! nothing in this workspace mints IDs by arithmetic, so the types carry
//! no successor or raw-conversion helpers. Construction is always an
//! explicit `new`.
//!
//! Display renders as `prefix:value` (`session:42`), the form the log
//! fields use.

use std::fmt;

/// Generates a strongly-typed ID wrapper around a u64.
///
/// The wrapper is `Copy`, hashable, and ordered, with a derived `Debug`
/// and a `prefix:value` `Display`. Doc comments on the invocation are
/// forwarded to the generated type.
macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident => $prefix:literal;)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
            pub struct $name(u64);

            impl $name {
                /// Creates an ID from its raw value.
                #[must_use]
                pub const fn new(value: u64) -> Self {
                    Self(value)
                }

                /// Returns the raw value.
                #[must_use]
                pub const fn get(self) -> u64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}:{}", $prefix, self.0)
                }
            }
        )+
    };
}

define_id! {
    /// Unique identifier for one logical client session.
    SessionId => "session";

    /// Unique identifier for one in-flight operation on a node.
    OperationId => "op";

    /// Monotonic transaction number within a session.
    TxnNumber => "txn";

    /// Cluster timestamp, used for transaction prepare/commit points.
    Timestamp => "ts";

    /// Unique identifier for a shard in the cluster.
    ShardId => "shard";
}

/// Position of a statement within a retryable write or transaction.
///
/// Statement IDs are small and dense (they count statements inside one
/// command batch), so a 32-bit value is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StatementId(u32);

impl StatementId {
    /// Creates a statement ID from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_equality_and_hash() {
        use std::collections::HashMap;

        let a = SessionId::new(7);
        let b = SessionId::new(7);
        let c = SessionId::new(8);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = HashMap::new();
        map.insert(a, "first");
        assert_eq!(map.get(&b), Some(&"first"));
        assert_eq!(map.get(&c), None);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(SessionId::new(3).to_string(), "session:3");
        assert_eq!(ShardId::new(1).to_string(), "shard:1");
        assert_eq!(format!("{:?}", TxnNumber::new(9)), "TxnNumber(9)");
    }

    #[test]
    fn test_id_ordering() {
        assert!(TxnNumber::new(1) < TxnNumber::new(2));
        assert_eq!(
            Timestamp::new(10).max(Timestamp::new(12)),
            Timestamp::new(12)
        );
    }

    #[test]
    fn test_statement_id() {
        let s = StatementId::new(4);
        assert_eq!(s.get(), 4);
        assert_eq!(s.to_string(), "stmt:4");
    }
}
