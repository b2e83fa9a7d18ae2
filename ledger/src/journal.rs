//! Transfer and entry rows for double-entry bookkeeping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tallybank_common::{AccountId, Currency, CurrencyPair, EntryId, TransferId};

/// One signed posting against one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    /// Negative for debits, positive for credits.
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Parameters for posting an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount: Decimal,
}

impl NewEntry {
    /// A debit of `amount` (stored negative).
    pub fn debit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            account_id,
            amount: -amount,
        }
    }

    /// A credit of `amount`.
    pub fn credit(account_id: AccountId, amount: Decimal) -> Self {
        Self { account_id, amount }
    }
}

/// An immutable record of one funds movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Denominated in `from_currency`.
    pub amount: Decimal,
    /// Denominated in `to_currency`.
    pub converted_amount: Decimal,
    /// Rate applied; 1 for same-currency transfers.
    pub exchange_rate: Decimal,
    pub from_currency: Currency,
    pub to_currency: Currency,
    /// Flat fee in `from_currency`, debited on top of `amount`.
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Total taken from the source account.
    pub fn debit_total(&self) -> Decimal {
        self.amount + self.fee
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from_currency.clone(), self.to_currency.clone())
    }

    /// Check that `from_entry`/`to_entry` are exactly the two postings this
    /// transfer must own.
    pub fn is_balanced_with(&self, from_entry: &Entry, to_entry: &Entry) -> bool {
        from_entry.account_id == self.from_account_id
            && to_entry.account_id == self.to_account_id
            && from_entry.amount == -self.debit_total()
            && to_entry.amount == self.converted_amount
            && from_entry.amount + to_entry.amount
                == self.converted_amount - self.amount - self.fee
    }
}

/// Parameters for recording a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub converted_amount: Decimal,
    pub exchange_rate: Decimal,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub fee: Decimal,
}

impl NewTransfer {
    /// Materialize the row once the store has assigned an id and timestamp.
    pub fn into_transfer(self, id: TransferId, created_at: DateTime<Utc>) -> Transfer {
        Transfer {
            id,
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
            converted_amount: self.converted_amount,
            exchange_rate: self.exchange_rate,
            from_currency: self.from_currency,
            to_currency: self.to_currency,
            fee: self.fee,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer(amount: Decimal, converted: Decimal, fee: Decimal) -> Transfer {
        NewTransfer {
            from_account_id: AccountId::new(1),
            to_account_id: AccountId::new(2),
            amount,
            converted_amount: converted,
            exchange_rate: dec!(0.85),
            from_currency: Currency::usd(),
            to_currency: Currency::eur(),
            fee,
        }
        .into_transfer(TransferId::new(10), Utc::now())
    }

    fn entry(id: i64, account: i64, amount: Decimal) -> Entry {
        Entry {
            id: EntryId::new(id),
            account_id: AccountId::new(account),
            amount,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_balanced_entries() {
        let transfer = transfer(dec!(100), dec!(85.00), dec!(1.99));
        let from = entry(1, 1, dec!(-101.99));
        let to = entry(2, 2, dec!(85.00));

        assert_eq!(transfer.debit_total(), dec!(101.99));
        assert!(transfer.is_balanced_with(&from, &to));
    }

    #[test]
    fn test_entries_on_wrong_accounts() {
        let transfer = transfer(dec!(100), dec!(85.00), dec!(0));
        let from = entry(1, 2, dec!(-100));
        let to = entry(2, 1, dec!(85.00));

        assert!(!transfer.is_balanced_with(&from, &to));
    }

    #[test]
    fn test_fee_missing_from_debit() {
        let transfer = transfer(dec!(100), dec!(85.00), dec!(1.99));
        let from = entry(1, 1, dec!(-100));
        let to = entry(2, 2, dec!(85.00));

        assert!(!transfer.is_balanced_with(&from, &to));
    }

    #[test]
    fn test_new_entry_signs() {
        assert_eq!(NewEntry::debit(AccountId::new(1), dec!(5)).amount, dec!(-5));
        assert_eq!(NewEntry::credit(AccountId::new(1), dec!(5)).amount, dec!(5));
    }
}
