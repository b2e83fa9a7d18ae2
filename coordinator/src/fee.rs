//! Transfer fee policy.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tallybank_common::Currency;

/// Which transfers are charged the flat fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeeMode {
    /// Every transfer.
    Always,
    /// Only transfers whose currencies differ.
    #[default]
    CrossCurrencyOnly,
    /// No transfer.
    Never,
}

impl FromStr for FeeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(FeeMode::Always),
            "cross-currency" | "cross_currency" => Ok(FeeMode::CrossCurrencyOnly),
            "never" | "none" => Ok(FeeMode::Never),
            other => Err(format!("unknown fee mode: {}", other)),
        }
    }
}

impl fmt::Display for FeeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeMode::Always => write!(f, "always"),
            FeeMode::CrossCurrencyOnly => write!(f, "cross-currency"),
            FeeMode::Never => write!(f, "never"),
        }
    }
}

/// Flat fee in the source currency, debited on top of the amount.
///
/// The fee is one-sided: it is taken from the source account and not
/// credited anywhere by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub flat_fee: Decimal,
    pub mode: FeeMode,
}

impl FeePolicy {
    pub fn new(flat_fee: Decimal, mode: FeeMode) -> Self {
        Self { flat_fee, mode }
    }

    /// A policy that never charges.
    pub fn free() -> Self {
        Self::new(Decimal::ZERO, FeeMode::Never)
    }

    /// Fee for a transfer from `from` to `to`.
    pub fn fee(&self, from: &Currency, to: &Currency) -> Decimal {
        let charged = match self.mode {
            FeeMode::Always => true,
            FeeMode::CrossCurrencyOnly => from != to,
            FeeMode::Never => false,
        };
        if charged {
            self.flat_fee
        } else {
            Decimal::ZERO
        }
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::new(Decimal::new(199, 2), FeeMode::CrossCurrencyOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_charges_cross_currency_only() {
        let policy = FeePolicy::default();
        assert_eq!(policy.fee(&Currency::usd(), &Currency::eur()), dec!(1.99));
        assert_eq!(policy.fee(&Currency::usd(), &Currency::usd()), Decimal::ZERO);
    }

    #[test]
    fn test_always_and_never() {
        let always = FeePolicy::new(dec!(0.50), FeeMode::Always);
        assert_eq!(always.fee(&Currency::ngn(), &Currency::ngn()), dec!(0.50));

        let never = FeePolicy::free();
        assert_eq!(never.fee(&Currency::usd(), &Currency::gbp()), Decimal::ZERO);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("cross-currency".parse::<FeeMode>().unwrap(), FeeMode::CrossCurrencyOnly);
        assert_eq!("ALWAYS".parse::<FeeMode>().unwrap(), FeeMode::Always);
        assert!("sometimes".parse::<FeeMode>().is_err());
    }
}
