//! Tallybank Ledger
//!
//! Account, entry and transfer rows, the narrow store interface the transfer
//! coordinator consumes, and two implementations of it: an in-memory store
//! with row locks and a PostgreSQL store.

pub mod account;
pub mod journal;
pub mod balance;
pub mod store;
pub mod memory;
pub mod postgres;

pub use account::{Account, NewAccount};
pub use journal::{Entry, NewEntry, NewTransfer, Transfer};
pub use balance::{verify_account, BalanceAudit};
pub use store::{LedgerStore, LedgerUnit, Page};
pub use memory::{FaultPoint, MemoryLedgerStore, MemoryStoreConfig};
pub use postgres::{PgLedgerStore, PgStoreConfig};
