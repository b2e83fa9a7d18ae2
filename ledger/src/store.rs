//! The narrow store interface consumed by the transfer coordinator.
//!
//! Reads that happen outside a transfer go through [`LedgerStore`]. Every
//! write happens inside a [`LedgerUnit`], which commits all of its calls
//! together or none of them. Dropping a unit without committing rolls it
//! back, so a cancelled future never leaves partial writes behind.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tallybank_common::{AccountId, CurrencyPair, EntryId, ExchangeRate, StoreResult, TransferId};

use crate::account::Account;
use crate::journal::{Entry, NewEntry, NewTransfer, Transfer};

/// Limit/offset pagination for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Page number `n` (1-based) of `size` rows.
    pub fn numbered(n: u32, size: u32) -> Self {
        Self {
            limit: size,
            offset: n.saturating_sub(1).saturating_mul(size),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Read access to the ledger plus the entry point for atomic units.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch an account by id.
    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    /// Fetch the stored rate for an ordered pair.
    async fn get_exchange_rate(&self, pair: &CurrencyPair) -> StoreResult<Option<ExchangeRate>>;

    /// All stored rates, ordered by pair.
    async fn list_exchange_rates(&self) -> StoreResult<Vec<ExchangeRate>>;

    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>>;

    async fn get_entry(&self, id: EntryId) -> StoreResult<Option<Entry>>;

    /// Entries posted against an account, oldest first.
    async fn list_entries(&self, account_id: AccountId, page: Page) -> StoreResult<Vec<Entry>>;

    /// Transfers where the account is either side, oldest first.
    async fn list_transfers(&self, account_id: AccountId, page: Page)
        -> StoreResult<Vec<Transfer>>;

    /// Sum of every entry posted against an account.
    async fn sum_entries(&self, account_id: AccountId) -> StoreResult<Decimal>;

    /// Open an atomic unit.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>>;
}

/// One all-or-nothing group of store calls.
#[async_trait]
pub trait LedgerUnit: Send {
    /// Fetch an account as this unit sees it, including its own pending
    /// balance changes.
    async fn get_account(&mut self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn create_transfer(&mut self, transfer: NewTransfer) -> StoreResult<Transfer>;

    async fn create_entry(&mut self, entry: NewEntry) -> StoreResult<Entry>;

    /// Atomically add a signed delta to an account balance and return the
    /// new balance. Takes the account's row lock for the rest of the unit.
    async fn add_account_balance(&mut self, id: AccountId, delta: Decimal) -> StoreResult<Decimal>;

    /// Make every write of this unit durable and visible.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every write of this unit.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_pages() {
        assert_eq!(Page::numbered(1, 10), Page::new(10, 0));
        assert_eq!(Page::numbered(3, 10), Page::new(10, 20));
        assert_eq!(Page::numbered(0, 10), Page::new(10, 0));
    }
}
