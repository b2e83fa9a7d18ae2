//! PostgreSQL ledger store on sqlx.
//!
//! An atomic unit is one database transaction. Balance deltas are applied
//! with `UPDATE ... SET balance = balance + $2 ... RETURNING balance`, which
//! takes the row lock and lets the database serialize concurrent deltas.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use tallybank_common::{
    AccountId, Currency, CurrencyPair, EntryId, ExchangeRate, StoreError, StoreResult, TransferId,
};

use crate::account::{Account, NewAccount};
use crate::journal::{Entry, NewEntry, NewTransfer, Transfer};
use crate::store::{LedgerStore, LedgerUnit, Page};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, converted_amount, \
     exchange_rate, from_currency, to_currency, fee, created_at";
const RATE_COLUMNS: &str = "id, from_currency, to_currency, rate, created_at, updated_at";

/// Connection settings for [`PgLedgerStore`].
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    /// PostgreSQL DSN.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// `lock_timeout` applied to every unit; a row lock wait past it is a
    /// conflict.
    pub lock_timeout_ms: Option<u64>,
}

impl PgStoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            lock_timeout_ms: None,
        }
    }
}

/// [`LedgerStore`] backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout_ms: Option<u64>,
}

impl PgLedgerStore {
    /// Connect a pool.
    pub async fn connect(config: &PgStoreConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(map_sqlx)?;

        info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self {
            pool,
            lock_timeout_ms: config.lock_timeout_ms,
        })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout_ms: None,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {}", e)))?;
        info!("Ledger schema migrated");
        Ok(())
    }

    /// Open an account and post its opening balance as the first entry.
    pub async fn create_account(&self, new: NewAccount) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row = sqlx::query(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(&new.owner)
        .bind(new.opening_balance)
        .bind(new.currency.code())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let account = account_from_row(&row)?;

        if !new.opening_balance.is_zero() {
            sqlx::query("INSERT INTO entries (account_id, amount) VALUES ($1, $2)")
                .bind(account.id.get())
                .bind(new.opening_balance)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(account)
    }

    /// Insert or refresh the rate for an ordered pair.
    pub async fn upsert_exchange_rate(
        &self,
        pair: &CurrencyPair,
        rate: Decimal,
    ) -> StoreResult<ExchangeRate> {
        let row = sqlx::query(&format!(
            "INSERT INTO exchange_rates (from_currency, to_currency, rate) VALUES ($1, $2, $3) \
             ON CONFLICT (from_currency, to_currency) \
             DO UPDATE SET rate = EXCLUDED.rate, updated_at = now() \
             RETURNING {}",
            RATE_COLUMNS
        ))
        .bind(pair.base.code())
        .bind(pair.quote.code())
        .bind(rate)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rate_from_row(&row)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_exchange_rate(&self, pair: &CurrencyPair) -> StoreResult<Option<ExchangeRate>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM exchange_rates WHERE from_currency = $1 AND to_currency = $2",
            RATE_COLUMNS
        ))
        .bind(pair.base.code())
        .bind(pair.quote.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(rate_from_row).transpose()
    }

    async fn list_exchange_rates(&self) -> StoreResult<Vec<ExchangeRate>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM exchange_rates ORDER BY from_currency, to_currency",
            RATE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(rate_from_row).collect()
    }

    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>> {
        let row = sqlx::query(&format!("SELECT {} FROM transfers WHERE id = $1", TRANSFER_COLUMNS))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn get_entry(&self, id: EntryId) -> StoreResult<Option<Entry>> {
        let row = sqlx::query(&format!("SELECT {} FROM entries WHERE id = $1", ENTRY_COLUMNS))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> StoreResult<Vec<Entry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        ))
        .bind(account_id.get())
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn list_transfers(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> StoreResult<Vec<Transfer>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transfers WHERE from_account_id = $1 OR to_account_id = $1 \
             ORDER BY id LIMIT $2 OFFSET $3",
            TRANSFER_COLUMNS
        ))
        .bind(account_id.get())
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(transfer_from_row).collect()
    }

    async fn sum_entries(&self, account_id: AccountId) -> StoreResult<Decimal> {
        let row = sqlx::query("SELECT COALESCE(SUM(amount), 0) AS total FROM entries WHERE account_id = $1")
            .bind(account_id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.try_get("total").map_err(map_sqlx)
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        if let Some(ms) = self.lock_timeout_ms {
            sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", ms))
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }
        Ok(Box::new(PgUnit { tx }))
    }
}

/// One database transaction. Rolled back by sqlx when dropped uncommitted.
struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerUnit for PgUnit {
    async fn get_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> StoreResult<Transfer> {
        let row = sqlx::query(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount, converted_amount, \
             exchange_rate, from_currency, to_currency, fee) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            TRANSFER_COLUMNS
        ))
        .bind(transfer.from_account_id.get())
        .bind(transfer.to_account_id.get())
        .bind(transfer.amount)
        .bind(transfer.converted_amount)
        .bind(transfer.exchange_rate)
        .bind(transfer.from_currency.code())
        .bind(transfer.to_currency.code())
        .bind(transfer.fee)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        transfer_from_row(&row)
    }

    async fn create_entry(&mut self, entry: NewEntry) -> StoreResult<Entry> {
        let row = sqlx::query(&format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(entry.account_id.get())
        .bind(entry.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        entry_from_row(&row)
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: Decimal) -> StoreResult<Decimal> {
        let row = sqlx::query("UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING balance")
            .bind(id.get())
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| StoreError::RowNotFound(format!("account {}", id)))?;
        row.try_get("balance").map_err(map_sqlx)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(map_sqlx)?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(map_sqlx)?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    Ok(Account {
        id: AccountId::new(row.try_get("id").map_err(map_sqlx)?),
        owner: row.try_get("owner").map_err(map_sqlx)?,
        balance: row.try_get("balance").map_err(map_sqlx)?,
        currency: Currency::new(row.try_get::<String, _>("currency").map_err(map_sqlx)?),
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
    })
}

fn entry_from_row(row: &PgRow) -> StoreResult<Entry> {
    Ok(Entry {
        id: EntryId::new(row.try_get("id").map_err(map_sqlx)?),
        account_id: AccountId::new(row.try_get("account_id").map_err(map_sqlx)?),
        amount: row.try_get("amount").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
    })
}

fn transfer_from_row(row: &PgRow) -> StoreResult<Transfer> {
    Ok(Transfer {
        id: TransferId::new(row.try_get("id").map_err(map_sqlx)?),
        from_account_id: AccountId::new(row.try_get("from_account_id").map_err(map_sqlx)?),
        to_account_id: AccountId::new(row.try_get("to_account_id").map_err(map_sqlx)?),
        amount: row.try_get("amount").map_err(map_sqlx)?,
        converted_amount: row.try_get("converted_amount").map_err(map_sqlx)?,
        exchange_rate: row.try_get("exchange_rate").map_err(map_sqlx)?,
        from_currency: Currency::new(row.try_get::<String, _>("from_currency").map_err(map_sqlx)?),
        to_currency: Currency::new(row.try_get::<String, _>("to_currency").map_err(map_sqlx)?),
        fee: row.try_get("fee").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
    })
}

fn rate_from_row(row: &PgRow) -> StoreResult<ExchangeRate> {
    let base = Currency::new(row.try_get::<String, _>("from_currency").map_err(map_sqlx)?);
    let quote = Currency::new(row.try_get::<String, _>("to_currency").map_err(map_sqlx)?);
    Ok(ExchangeRate {
        id: row.try_get("id").map_err(map_sqlx)?,
        pair: CurrencyPair::new(base, quote),
        rate: row.try_get("rate").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
    })
}

/// Map sqlx errors onto the store taxonomy.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            classify_sqlstate(db_err.code().as_deref(), db_err.message().to_string())
        }
        sqlx::Error::RowNotFound => StoreError::RowNotFound("no rows returned".to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

/// Classify a PostgreSQL error by its SQLSTATE.
fn classify_sqlstate(code: Option<&str>, msg: String) -> StoreError {
    match code {
        // serialization_failure, deadlock_detected, lock_not_available
        Some("40001") | Some("40P01") | Some("55P03") => StoreError::Conflict(msg),
        Some(code) if code.starts_with("23") => StoreError::Constraint(msg),
        _ => StoreError::Database(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_failures_are_transient() {
        for code in ["40001", "40P01", "55P03"] {
            let err = classify_sqlstate(Some(code), "could not serialize".into());
            assert_eq!(err, StoreError::Conflict("could not serialize".into()));
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_integrity_violations_are_constraints() {
        let err = classify_sqlstate(Some("23514"), "check violation".into());
        assert_eq!(err, StoreError::Constraint("check violation".into()));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_other_sqlstates_are_fatal() {
        assert_eq!(
            classify_sqlstate(Some("42P01"), "undefined table".into()),
            StoreError::Database("undefined table".into())
        );
        assert!(!classify_sqlstate(None, "unknown".into()).is_transient());
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        let err = map_sqlx(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(_)));

        assert!(matches!(map_sqlx(sqlx::Error::RowNotFound), StoreError::RowNotFound(_)));
        assert!(matches!(
            map_sqlx(sqlx::Error::Protocol("bad frame".into())),
            StoreError::Database(_)
        ));
    }
}
