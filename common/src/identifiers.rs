//! Identifier types for ledger rows.
//!
//! All ledger rows are keyed by store-assigned 64-bit sequence numbers.
//! Account identifiers are totally ordered; the coordinator relies on that
//! order to decide which account row is touched first.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw store identifier.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Get the raw store identifier.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

row_id!(
    /// Identifier of an account row.
    AccountId
);

row_id!(
    /// Identifier of a transfer row.
    TransferId
);

row_id!(
    /// Identifier of a ledger entry row.
    EntryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_ordering() {
        let low = AccountId::new(3);
        let high = AccountId::new(17);
        assert!(low < high);
        assert_eq!(std::cmp::min(high, low), low);
    }

    #[test]
    fn test_id_serializes_as_number() {
        let id = TransferId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");

        let parsed: EntryId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed.get(), 7);
    }
}
