//! Shared fixture for coordinator integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tallybank_common::{Currency, CurrencyPair, ManualClock};
use tallybank_coordinator::{FeePolicy, TransferCoordinator};
use tallybank_fx::{ExchangeResolver, LedgerRateProvider, ResolverConfig};
use tallybank_ledger::{Account, LedgerStore, MemoryLedgerStore, MemoryStoreConfig, NewAccount};

pub struct Bank {
    pub store: MemoryLedgerStore,
    pub clock: Arc<ManualClock>,
    pub coordinator: Arc<TransferCoordinator>,
}

impl Bank {
    pub fn new(fees: FeePolicy) -> Self {
        Self::with_store_config(fees, MemoryStoreConfig::default())
    }

    pub fn with_store_config(fees: FeePolicy, config: MemoryStoreConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryLedgerStore::with_clock(config, clock.clone());
        let shared: Arc<dyn LedgerStore> = Arc::new(store.clone());
        let resolver = Arc::new(ExchangeResolver::with_clock(
            Arc::new(LedgerRateProvider::new(shared.clone())),
            ResolverConfig::default(),
            clock.clone(),
        ));

        Self {
            store,
            clock,
            coordinator: Arc::new(TransferCoordinator::new(shared, resolver, fees)),
        }
    }

    pub fn open(&self, owner: &str, currency: Currency, balance: Decimal) -> Account {
        self.store.create_account(NewAccount::new(owner, currency, balance))
    }

    pub fn rate(&self, from: Currency, to: Currency, rate: Decimal) {
        self.store.upsert_exchange_rate(CurrencyPair::new(from, to), rate);
    }

    pub async fn balance(&self, account: &Account) -> Decimal {
        self.store
            .get_account(account.id)
            .await
            .expect("store read")
            .expect("account exists")
            .balance
    }
}
