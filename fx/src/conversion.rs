//! Currency conversion and rounding.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tallybank_common::{Currency, CurrencyPair};

/// How converted amounts are rounded to the target currency's minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingStrategy {
    /// Midpoint rounds away from zero: 0.125 -> 0.13.
    #[default]
    HalfUp,
    /// Banker's rounding, midpoint to the even digit: 0.125 -> 0.12.
    HalfEven,
}

impl RoundingStrategy {
    /// Round `value` to `dp` decimal places.
    pub fn round(&self, value: Decimal, dp: u32) -> Decimal {
        let strategy = match self {
            RoundingStrategy::HalfUp => rust_decimal::RoundingStrategy::MidpointAwayFromZero,
            RoundingStrategy::HalfEven => rust_decimal::RoundingStrategy::MidpointNearestEven,
        };
        value.round_dp_with_strategy(dp, strategy)
    }
}

impl FromStr for RoundingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "half-up" | "half_up" => Ok(RoundingStrategy::HalfUp),
            "half-even" | "half_even" | "bankers" => Ok(RoundingStrategy::HalfEven),
            other => Err(format!("unknown rounding strategy: {}", other)),
        }
    }
}

impl fmt::Display for RoundingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundingStrategy::HalfUp => write!(f, "half-up"),
            RoundingStrategy::HalfEven => write!(f, "half-even"),
        }
    }
}

/// Convert `amount` at `rate` into `target`, rounded to its minor units.
pub fn convert(amount: Decimal, rate: Decimal, target: &Currency, rounding: RoundingStrategy) -> Decimal {
    rounding.round(amount * rate, target.decimal_places())
}

/// Outcome of resolving a conversion for one amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Direction of the conversion.
    pub pair: CurrencyPair,
    /// Rate applied. 1 for same-currency.
    pub rate: Decimal,
    /// Amount in the source currency.
    pub amount: Decimal,
    /// Amount in the target currency.
    pub converted_amount: Decimal,
    /// Whether the rate may be used for a transfer right now.
    pub can_transact: bool,
    /// When the rate was last refreshed. `None` for same-currency.
    pub updated_at: Option<DateTime<Utc>>,
    /// When the rate stops being usable. `None` for same-currency.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Resolution {
    /// A same-currency resolution: rate 1, nothing converted, never expires.
    pub fn identity(currency: Currency, amount: Decimal) -> Self {
        Self {
            pair: CurrencyPair::new(currency.clone(), currency),
            rate: Decimal::ONE,
            amount,
            converted_amount: amount,
            can_transact: true,
            updated_at: None,
            expires_at: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.pair.is_identity()
    }
}
