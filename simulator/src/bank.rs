//! Simulated customer accounts on an in-memory ledger.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use tallybank_common::{AccountId, Currency, CurrencyPair};
use tallybank_ledger::{Account, MemoryLedgerStore, NewAccount};

/// Reference rates seeded into the ledger, quoted against USD.
const USD_RATES: [(&str, &str); 3] = [("EUR", "0.92"), ("GBP", "0.79"), ("NGN", "1550.00")];

/// A simulated customer holding one ledger account.
#[derive(Debug, Clone)]
pub struct SimulatedCustomer {
    pub name: String,
    pub account: Account,
}

impl SimulatedCustomer {
    pub fn id(&self) -> AccountId {
        self.account.id
    }

    pub fn currency(&self) -> &Currency {
        &self.account.currency
    }
}

/// Opens customers on a store.
pub struct BankFactory;

impl BankFactory {
    /// Open `count` customers. With `multi_currency` the accounts rotate
    /// through every supported currency, otherwise all hold USD.
    pub fn open_customers(
        store: &MemoryLedgerStore,
        count: usize,
        opening_balance: Decimal,
        multi_currency: bool,
    ) -> Vec<SimulatedCustomer> {
        let currencies = [Currency::usd(), Currency::eur(), Currency::gbp(), Currency::ngn()];
        let names = [
            "ada", "bola", "chen", "dara", "emeka", "femi", "grace", "hana", "ife", "jon",
        ];

        (0..count)
            .map(|i| {
                let name = match names.get(i) {
                    Some(name) => name.to_string(),
                    None => format!("customer-{}", i + 1),
                };
                let currency = if multi_currency {
                    currencies[i % currencies.len()].clone()
                } else {
                    Currency::usd()
                };
                let account = store.create_account(NewAccount::new(name.clone(), currency, opening_balance));
                SimulatedCustomer { name, account }
            })
            .collect()
    }

    /// Seed every ordered pair of supported currencies, derived through USD.
    pub fn seed_rates(store: &MemoryLedgerStore) {
        let mut per_usd: BTreeMap<Currency, Decimal> = BTreeMap::new();
        per_usd.insert(Currency::usd(), Decimal::ONE);
        for (code, rate) in USD_RATES {
            if let Ok(rate) = rate.parse::<Decimal>() {
                per_usd.insert(Currency::new(code), rate);
            }
        }

        for (base, base_per_usd) in &per_usd {
            for (quote, quote_per_usd) in &per_usd {
                if base == quote {
                    continue;
                }
                let rate = (*quote_per_usd / *base_per_usd).round_dp(6);
                store.upsert_exchange_rate(CurrencyPair::new(base.clone(), quote.clone()), rate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tallybank_ledger::LedgerStore;

    #[test]
    fn test_open_customers_rotates_currencies() {
        let store = MemoryLedgerStore::new();
        let customers = BankFactory::open_customers(&store, 5, dec!(100), true);

        assert_eq!(customers.len(), 5);
        assert_eq!(customers[0].currency(), &Currency::usd());
        assert_eq!(customers[3].currency(), &Currency::ngn());
        assert_eq!(customers[4].currency(), &Currency::usd());
        assert_eq!(customers[0].account.balance, dec!(100));
    }

    #[tokio::test]
    async fn test_seed_rates_covers_every_pair() {
        let store = MemoryLedgerStore::new();
        BankFactory::seed_rates(&store);

        let rates = store.list_exchange_rates().await.unwrap();
        assert_eq!(rates.len(), 12);

        let eur_usd = store
            .get_exchange_rate(&CurrencyPair::new(Currency::eur(), Currency::usd()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(eur_usd.rate, dec!(1.086957));
    }
}
