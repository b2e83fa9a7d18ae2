//! Account definitions for ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tallybank_common::{AccountId, Currency};

/// A ledger account.
///
/// `balance` is only ever changed through the atomic delta primitive of a
/// store unit, so it always equals the sum of the account's entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owning user.
    pub owner: String,
    /// Signed balance in `currency`.
    pub balance: Decimal,
    /// Account currency.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Check if the account can cover a debit of `amount`.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

/// Parameters for opening an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner: String,
    pub currency: Currency,
    /// Posted as the account's first entry.
    pub opening_balance: Decimal,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, currency: Currency, opening_balance: Decimal) -> Self {
        Self {
            owner: owner.into(),
            currency,
            opening_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sufficient_funds_is_inclusive() {
        let account = Account {
            id: AccountId::new(1),
            owner: "ada".into(),
            balance: dec!(100.00),
            currency: Currency::usd(),
            created_at: Utc::now(),
        };

        assert!(account.has_sufficient_funds(dec!(100.00)));
        assert!(!account.has_sufficient_funds(dec!(100.01)));
    }
}
