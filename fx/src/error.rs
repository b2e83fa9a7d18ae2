//! FX error types.

use chrono::{DateTime, Utc};
use tallybank_common::{CurrencyPair, StoreError, TransferError};
use thiserror::Error;

/// Errors that can occur while resolving a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FxError {
    /// No rate is stored for the ordered pair.
    #[error("Rate not available for {0}")]
    RateNotAvailable(CurrencyPair),

    /// Rate is past its time-to-live.
    #[error("Rate for {pair} expired at {expired_at}")]
    RateExpired {
        pair: CurrencyPair,
        expired_at: DateTime<Utc>,
    },

    /// A stored or supplied rate is not positive.
    #[error("Rate for {0} is not positive")]
    ZeroRate(CurrencyPair),

    /// The rate source failed.
    #[error("Rate source error: {0}")]
    Store(#[from] StoreError),
}

impl From<FxError> for TransferError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::RateNotAvailable(pair) => TransferError::ExchangeRateNotFound(pair),
            FxError::RateExpired { pair, expired_at } => {
                TransferError::ExchangeRateExpired { pair, expired_at }
            }
            FxError::ZeroRate(pair) => TransferError::ExchangeRateZero(pair),
            FxError::Store(store) => store.into(),
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tallybank_common::Currency;

    #[test]
    fn test_maps_onto_transfer_taxonomy() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::ngn());

        let err: TransferError = FxError::RateNotAvailable(pair.clone()).into();
        assert_eq!(err, TransferError::ExchangeRateNotFound(pair.clone()));

        let err: TransferError = FxError::ZeroRate(pair).into();
        assert_eq!(err.error_code(), "EXCHANGE_RATE_ZERO");

        let err: TransferError = FxError::Store(StoreError::Conflict("busy".into())).into();
        assert!(err.is_retryable());
    }
}
