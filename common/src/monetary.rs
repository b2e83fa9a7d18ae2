//! Currency and exchange-rate types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Currencies the ledger accepts for accounts, quotes and transfers.
pub const SUPPORTED_CURRENCIES: [&str; 4] = ["USD", "NGN", "GBP", "EUR"];

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" => 0,
            "BHD" | "KWD" | "OMR" => 3,
            _ => 2,
        }
    }

    /// Whether the ledger accepts this currency.
    pub fn is_supported(&self) -> bool {
        SUPPORTED_CURRENCIES.contains(&self.0.as_str())
    }

    /// Comma-separated list of supported codes, for client-facing messages.
    pub fn supported_list() -> String {
        SUPPORTED_CURRENCIES.join(", ")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn ngn() -> Self {
        Self::new("NGN")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An ordered currency pair. `USD/EUR` and `EUR/USD` are distinct pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being converted from.
    pub base: Currency,
    /// Currency being converted to.
    pub quote: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// Whether both sides are the same currency.
    pub fn is_identity(&self) -> bool {
        self.base == self.quote
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A stored exchange rate. Read-only to the transfer path.
///
/// Expiry is not stored; it is derived from `updated_at` plus the
/// configured time-to-live by the FX crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// Store identifier.
    pub id: i64,
    /// Direction of the rate.
    pub pair: CurrencyPair,
    /// Units of `pair.quote` received per unit of `pair.base`.
    pub rate: Decimal,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the rate value was last refreshed.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_normalizes_case() {
        assert_eq!(Currency::new("usd"), Currency::usd());
        assert_eq!(Currency::from("eur").code(), "EUR");
    }

    #[test]
    fn test_supported_currencies() {
        assert!(Currency::usd().is_supported());
        assert!(Currency::ngn().is_supported());
        assert!(!Currency::new("JPY").is_supported());
        assert_eq!(Currency::supported_list(), "USD, NGN, GBP, EUR");
    }

    #[test]
    fn test_currency_decimal_places() {
        assert_eq!(Currency::usd().decimal_places(), 2);
        assert_eq!(Currency::ngn().decimal_places(), 2);
        assert_eq!(Currency::new("JPY").decimal_places(), 0);
    }

    #[test]
    fn test_pair_is_directional() {
        let forward = CurrencyPair::new(Currency::usd(), Currency::eur());
        let backward = CurrencyPair::new(Currency::eur(), Currency::usd());
        assert_ne!(forward, backward);
        assert_eq!(forward.to_string(), "USD/EUR");
        assert!(!forward.is_identity());
        assert!(CurrencyPair::new(Currency::gbp(), Currency::gbp()).is_identity());
    }
}
