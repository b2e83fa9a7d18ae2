//! In-memory ledger store.
//!
//! Behaves like a transactional relational store with row-level locking:
//! an atomic unit takes a per-account row lock the first time it touches a
//! balance and holds it until commit or rollback. A unit that waits longer
//! than `lock_wait_timeout` for a row lock fails with
//! [`StoreError::Conflict`], the same way a database reports a detected
//! deadlock. Writes are staged inside the unit and applied in one step on
//! commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, warn};

use tallybank_common::{
    AccountId, Clock, CurrencyPair, EntryId, ExchangeRate, StoreError, StoreResult, SystemClock,
    Timestamp, TransferId,
};

use crate::account::{Account, NewAccount};
use crate::journal::{Entry, NewEntry, NewTransfer, Transfer};
use crate::store::{LedgerStore, LedgerUnit, Page};

/// Tuning for the in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// How long a unit waits for a row lock before reporting a conflict.
    pub lock_wait_timeout: Duration,
    /// Artificial latency added to every unit write.
    pub op_delay: Option<Duration>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            lock_wait_timeout: Duration::from_secs(2),
            op_delay: None,
        }
    }
}

/// Unit operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    CreateTransfer,
    CreateEntry,
    AddBalance,
    Commit,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    transfers: BTreeMap<TransferId, Transfer>,
    entries: BTreeMap<EntryId, Entry>,
    rates: HashMap<CurrencyPair, ExchangeRate>,
}

struct Inner {
    tables: RwLock<Tables>,
    row_locks: DashMap<AccountId, Arc<RowLock<()>>>,
    next_account: AtomicI64,
    next_transfer: AtomicI64,
    next_entry: AtomicI64,
    next_rate: AtomicI64,
    faults: Mutex<HashMap<FaultPoint, StoreError>>,
    calls: AtomicU64,
    clock: Arc<dyn Clock>,
    config: MemoryStoreConfig,
}

impl Inner {
    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn take_fault(&self, point: FaultPoint) -> StoreResult<()> {
        match self.faults.lock().remove(&point) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn row_lock(&self, id: AccountId) -> Arc<RowLock<()>> {
        self.row_locks
            .entry(id)
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .value()
            .clone()
    }

    async fn delay(&self) {
        if let Some(delay) = self.config.op_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Thread-safe in-memory [`LedgerStore`]. Clones share the same tables.
#[derive(Clone)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    /// Create an empty store on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(MemoryStoreConfig::default(), Arc::new(SystemClock))
    }

    /// Create an empty store with explicit tuning on the wall clock.
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty store whose timestamps come from `clock`.
    pub fn with_clock(config: MemoryStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                next_account: AtomicI64::new(1),
                next_transfer: AtomicI64::new(1),
                next_entry: AtomicI64::new(1),
                next_rate: AtomicI64::new(1),
                faults: Mutex::new(HashMap::new()),
                calls: AtomicU64::new(0),
                clock,
                config,
            }),
        }
    }

    /// Open an account. A non-zero opening balance is posted as the
    /// account's first entry.
    pub fn create_account(&self, new: NewAccount) -> Account {
        let now = self.inner.clock.now();
        let id = AccountId::new(self.inner.next_account.fetch_add(1, Ordering::SeqCst));
        let account = Account {
            id,
            owner: new.owner,
            balance: new.opening_balance,
            currency: new.currency,
            created_at: now,
        };

        let mut tables = self.inner.tables.write();
        if !new.opening_balance.is_zero() {
            let entry_id = EntryId::new(self.inner.next_entry.fetch_add(1, Ordering::SeqCst));
            tables.entries.insert(
                entry_id,
                Entry {
                    id: entry_id,
                    account_id: id,
                    amount: new.opening_balance,
                    created_at: now,
                },
            );
        }
        tables.accounts.insert(id, account.clone());
        account
    }

    /// Insert or refresh the rate for an ordered pair. Refreshing moves
    /// `updated_at` to the current time.
    pub fn upsert_exchange_rate(&self, pair: CurrencyPair, rate: Decimal) -> ExchangeRate {
        let now = self.inner.clock.now();
        let mut tables = self.inner.tables.write();
        let stored = match tables.rates.get(&pair) {
            Some(existing) => ExchangeRate {
                rate,
                updated_at: now,
                ..existing.clone()
            },
            None => ExchangeRate {
                id: self.inner.next_rate.fetch_add(1, Ordering::SeqCst),
                pair: pair.clone(),
                rate,
                created_at: now,
                updated_at: now,
            },
        };
        tables.rates.insert(pair, stored.clone());
        stored
    }

    /// Make the next call at `point` fail with `err`.
    pub fn fail_next(&self, point: FaultPoint, err: StoreError) {
        self.inner.faults.lock().insert(point, err);
    }

    /// Number of store and unit calls served so far.
    pub fn call_count(&self) -> u64 {
        self.inner.calls.load(Ordering::Relaxed)
    }

    /// Snapshot of every account, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        self.inner.tables.read().accounts.values().cloned().collect()
    }

    pub fn transfer_count(&self) -> usize {
        self.inner.tables.read().transfers.len()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.tables.read().entries.len()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

fn paginate<T: Clone>(rows: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    rows.skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        self.inner.record_call();
        Ok(self.inner.tables.read().accounts.get(&id).cloned())
    }

    async fn get_exchange_rate(&self, pair: &CurrencyPair) -> StoreResult<Option<ExchangeRate>> {
        self.inner.record_call();
        Ok(self.inner.tables.read().rates.get(pair).cloned())
    }

    async fn list_exchange_rates(&self) -> StoreResult<Vec<ExchangeRate>> {
        self.inner.record_call();
        let mut rates: Vec<_> = self.inner.tables.read().rates.values().cloned().collect();
        rates.sort_by(|a, b| {
            (a.pair.base.code(), a.pair.quote.code()).cmp(&(b.pair.base.code(), b.pair.quote.code()))
        });
        Ok(rates)
    }

    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>> {
        self.inner.record_call();
        Ok(self.inner.tables.read().transfers.get(&id).cloned())
    }

    async fn get_entry(&self, id: EntryId) -> StoreResult<Option<Entry>> {
        self.inner.record_call();
        Ok(self.inner.tables.read().entries.get(&id).cloned())
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> StoreResult<Vec<Entry>> {
        self.inner.record_call();
        let tables = self.inner.tables.read();
        Ok(paginate(
            tables
                .entries
                .values()
                .filter(|e| e.account_id == account_id)
                .cloned(),
            page,
        ))
    }

    async fn list_transfers(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> StoreResult<Vec<Transfer>> {
        self.inner.record_call();
        let tables = self.inner.tables.read();
        Ok(paginate(
            tables
                .transfers
                .values()
                .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
                .cloned(),
            page,
        ))
    }

    async fn sum_entries(&self, account_id: AccountId) -> StoreResult<Decimal> {
        self.inner.record_call();
        let tables = self.inner.tables.read();
        Ok(tables
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .map(|e| e.amount)
            .sum())
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>> {
        self.inner.record_call();
        Ok(Box::new(MemoryUnit {
            store: self.inner.clone(),
            stamped_at: self.inner.clock.now(),
            guards: BTreeMap::new(),
            deltas: BTreeMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
        }))
    }
}

/// Staged writes plus the row locks a unit holds.
struct MemoryUnit {
    store: Arc<Inner>,
    /// Every row written by the unit carries this timestamp.
    stamped_at: Timestamp,
    guards: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    deltas: BTreeMap<AccountId, Decimal>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
}

impl MemoryUnit {
    fn account_exists(&self, id: AccountId) -> bool {
        self.store.tables.read().accounts.contains_key(&id)
    }

    async fn lock_row(&mut self, id: AccountId) -> StoreResult<()> {
        if self.guards.contains_key(&id) {
            return Ok(());
        }

        let lock = self.store.row_lock(id);
        let wait = self.store.config.lock_wait_timeout;
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => {
                self.guards.insert(id, guard);
                Ok(())
            }
            Err(_) => {
                warn!(
                    account_id = %id,
                    held = ?self.guards.keys().collect::<Vec<_>>(),
                    "Row lock wait timed out"
                );
                Err(StoreError::Conflict(format!(
                    "lock wait timeout on account {}",
                    id
                )))
            }
        }
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn get_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        self.store.record_call();
        let pending = self.deltas.get(&id).copied().unwrap_or_default();
        Ok(self.store.tables.read().accounts.get(&id).map(|account| Account {
            balance: account.balance + pending,
            ..account.clone()
        }))
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> StoreResult<Transfer> {
        self.store.record_call();
        self.store.delay().await;
        self.store.take_fault(FaultPoint::CreateTransfer)?;

        for id in [transfer.from_account_id, transfer.to_account_id] {
            if !self.account_exists(id) {
                return Err(StoreError::Constraint(format!(
                    "transfers references missing account {}",
                    id
                )));
            }
        }

        let id = TransferId::new(self.store.next_transfer.fetch_add(1, Ordering::SeqCst));
        let transfer = transfer.into_transfer(id, self.stamped_at);
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, entry: NewEntry) -> StoreResult<Entry> {
        self.store.record_call();
        self.store.delay().await;
        self.store.take_fault(FaultPoint::CreateEntry)?;

        if !self.account_exists(entry.account_id) {
            return Err(StoreError::Constraint(format!(
                "entries references missing account {}",
                entry.account_id
            )));
        }

        let entry = Entry {
            id: EntryId::new(self.store.next_entry.fetch_add(1, Ordering::SeqCst)),
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: self.stamped_at,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: Decimal) -> StoreResult<Decimal> {
        self.store.record_call();
        self.lock_row(id).await?;
        self.store.delay().await;
        self.store.take_fault(FaultPoint::AddBalance)?;

        let committed = match self.store.tables.read().accounts.get(&id) {
            Some(account) => account.balance,
            None => return Err(StoreError::RowNotFound(format!("account {}", id))),
        };

        let pending = self.deltas.entry(id).or_default();
        *pending += delta;
        Ok(committed + *pending)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.store.record_call();
        self.store.take_fault(FaultPoint::Commit)?;

        let unit = *self;
        {
            let mut tables = unit.store.tables.write();
            if let Some(missing) = unit.deltas.keys().find(|id| !tables.accounts.contains_key(id)) {
                return Err(StoreError::RowNotFound(format!("account {}", missing)));
            }
            for (id, delta) in &unit.deltas {
                if let Some(account) = tables.accounts.get_mut(id) {
                    account.balance += *delta;
                }
            }
            for transfer in unit.transfers {
                tables.transfers.insert(transfer.id, transfer);
            }
            for entry in unit.entries {
                tables.entries.insert(entry.id, entry);
            }
        }

        debug!(rows_locked = unit.guards.len(), "Unit committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.store.record_call();
        debug!(
            staged_transfers = self.transfers.len(),
            staged_entries = self.entries.len(),
            "Unit rolled back"
        );
        Ok(())
    }
}
