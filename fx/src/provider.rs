//! Rate provider trait and implementations.

use std::sync::Arc;

use async_trait::async_trait;
use tallybank_common::{CurrencyPair, ExchangeRate};
use tallybank_ledger::LedgerStore;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Source of stored exchange rates.
///
/// Lookups are direction-specific: `USD/EUR` and `EUR/USD` are separate
/// rates and a provider never inverts one into the other.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Get the stored rate for an ordered pair.
    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<ExchangeRate>;

    /// Get every stored rate.
    async fn list_rates(&self) -> FxResult<Vec<ExchangeRate>>;
}

/// Reads rates from the ledger store's `exchange_rates` table.
pub struct LedgerRateProvider {
    store: Arc<dyn LedgerStore>,
}

impl LedgerRateProvider {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RateProvider for LedgerRateProvider {
    fn name(&self) -> &str {
        "LEDGER"
    }

    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<ExchangeRate> {
        let rate = self
            .store
            .get_exchange_rate(pair)
            .await?
            .ok_or_else(|| FxError::RateNotAvailable(pair.clone()))?;

        debug!(pair = %pair, rate = %rate.rate, updated_at = %rate.updated_at, "Loaded rate");
        Ok(rate)
    }

    async fn list_rates(&self) -> FxResult<Vec<ExchangeRate>> {
        Ok(self.store.list_exchange_rates().await?)
    }
}

/// Mock rate provider for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateProvider {
    name: String,
    rates: dashmap::DashMap<CurrencyPair, ExchangeRate>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateProvider {
    /// Create a new mock provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
        }
    }

    /// Store a rate for a pair, last refreshed at `updated_at`.
    pub fn set_rate(
        &self,
        pair: CurrencyPair,
        rate: rust_decimal::Decimal,
        updated_at: chrono::DateTime<chrono::Utc>,
    ) -> ExchangeRate {
        let id = self.rates.len() as i64 + 1;
        let stored = ExchangeRate {
            id,
            pair: pair.clone(),
            rate,
            created_at: updated_at,
            updated_at,
        };
        self.rates.insert(pair, stored.clone());
        stored
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateProvider for MockRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<ExchangeRate> {
        self.rates
            .get(pair)
            .map(|r| r.clone())
            .ok_or_else(|| FxError::RateNotAvailable(pair.clone()))
    }

    async fn list_rates(&self) -> FxResult<Vec<ExchangeRate>> {
        let mut rates: Vec<_> = self.rates.iter().map(|r| r.value().clone()).collect();
        rates.sort_by_key(|r| r.id);
        Ok(rates)
    }
}
