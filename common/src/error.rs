//! Error types for the ledger store and the transfer path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AccountId, Currency, CurrencyPair};

/// Errors surfaced by a ledger store implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Serialization failure, detected deadlock or lock wait timeout.
    /// The whole atomic unit may be retried.
    #[error("Store conflict: {0}")]
    Conflict(String),

    /// A row referenced by a write does not exist.
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// A constraint rejected the write.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other store failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Check if retrying the whole unit can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which side of a transfer an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSide {
    From,
    To,
}

/// Coarse classification of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-fixable; never retried.
    Client,
    /// Safe to retry the identical request.
    Transient,
    /// Anything else; propagated and not retried.
    Fatal,
}

/// Closed error taxonomy for quotes and transfers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("cannot transfer to the same account ({0})")]
    SameAccountTransfer(AccountId),

    #[error("transfer amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("currency {0} is not supported")]
    UnsupportedCurrency(Currency),

    #[error("from account {0} not found")]
    FromAccountNotFound(AccountId),

    #[error("to account {0} not found")]
    ToAccountNotFound(AccountId),

    #[error("from account {account_id} holds {account_currency}, request declared {declared}")]
    FromCurrencyMismatch {
        account_id: AccountId,
        account_currency: Currency,
        declared: Currency,
    },

    #[error("to account {account_id} holds {account_currency}, request declared {declared}")]
    ToCurrencyMismatch {
        account_id: AccountId,
        account_currency: Currency,
        declared: Currency,
    },

    #[error("insufficient balance in account {account_id}: available {available}, required {required}")]
    InsufficientBalance {
        account_id: AccountId,
        available: Decimal,
        required: Decimal,
    },

    #[error("exchange rate not found for {0}")]
    ExchangeRateNotFound(CurrencyPair),

    #[error("exchange rate for {pair} expired at {expired_at}")]
    ExchangeRateExpired {
        pair: CurrencyPair,
        expired_at: DateTime<Utc>,
    },

    #[error("exchange rate for {pair} moved: quoted {quoted}, current {current}")]
    ExchangeRateMismatch {
        pair: CurrencyPair,
        quoted: Decimal,
        current: Decimal,
    },

    #[error("exchange rate for {0} must be greater than zero")]
    ExchangeRateZero(CurrencyPair),

    /// The caller's deadline elapsed while the atomic unit was open.
    #[error("transfer deadline of {0}ms exceeded")]
    DeadlineExceeded(u64),

    /// A transient store failure inside the atomic unit.
    #[error("transient store failure: {0}")]
    Transient(StoreError),

    /// A non-retryable store failure.
    #[error("store failure: {0}")]
    Store(StoreError),
}

impl TransferError {
    /// Build a currency mismatch for the given side.
    pub fn currency_mismatch(
        side: TransferSide,
        account_id: AccountId,
        account_currency: Currency,
        declared: Currency,
    ) -> Self {
        match side {
            TransferSide::From => TransferError::FromCurrencyMismatch {
                account_id,
                account_currency,
                declared,
            },
            TransferSide::To => TransferError::ToCurrencyMismatch {
                account_id,
                account_currency,
                declared,
            },
        }
    }

    /// Build an account-not-found error for the given side.
    pub fn account_not_found(side: TransferSide, account_id: AccountId) -> Self {
        match side {
            TransferSide::From => TransferError::FromAccountNotFound(account_id),
            TransferSide::To => TransferError::ToAccountNotFound(account_id),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::SameAccountTransfer(_)
            | TransferError::InvalidAmount(_)
            | TransferError::UnsupportedCurrency(_)
            | TransferError::FromAccountNotFound(_)
            | TransferError::ToAccountNotFound(_)
            | TransferError::FromCurrencyMismatch { .. }
            | TransferError::ToCurrencyMismatch { .. }
            | TransferError::InsufficientBalance { .. }
            | TransferError::ExchangeRateNotFound(_)
            | TransferError::ExchangeRateExpired { .. }
            | TransferError::ExchangeRateMismatch { .. }
            | TransferError::ExchangeRateZero(_) => ErrorKind::Client,
            TransferError::DeadlineExceeded(_) | TransferError::Transient(_) => {
                ErrorKind::Transient
            }
            TransferError::Store(_) => ErrorKind::Fatal,
        }
    }

    /// Check if this error is retryable with identical parameters.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Get error code for transport mappings.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransferError::SameAccountTransfer(_) => "SAME_ACCOUNT_TRANSFER",
            TransferError::InvalidAmount(_) => "INVALID_AMOUNT",
            TransferError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            TransferError::FromAccountNotFound(_) => "FROM_ACCOUNT_NOT_FOUND",
            TransferError::ToAccountNotFound(_) => "TO_ACCOUNT_NOT_FOUND",
            TransferError::FromCurrencyMismatch { .. } => "FROM_CURRENCY_MISMATCH",
            TransferError::ToCurrencyMismatch { .. } => "TO_CURRENCY_MISMATCH",
            TransferError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            TransferError::ExchangeRateNotFound(_) => "EXCHANGE_RATE_NOT_FOUND",
            TransferError::ExchangeRateExpired { .. } => "EXCHANGE_RATE_EXPIRED",
            TransferError::ExchangeRateMismatch { .. } => "EXCHANGE_RATE_MISMATCH",
            TransferError::ExchangeRateZero(_) => "EXCHANGE_RATE_ZERO",
            TransferError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            TransferError::Transient(_) => "TRANSIENT_FAILURE",
            TransferError::Store(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-equivalent status for transport mappings.
    pub fn status_code(&self) -> u16 {
        match self {
            TransferError::ExchangeRateNotFound(_) => 404,
            _ => match self.kind() {
                ErrorKind::Client => 400,
                ErrorKind::Transient => 503,
                ErrorKind::Fatal => 500,
            },
        }
    }

    /// Message safe to show to a client. Store details are never included.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Client => self.to_string(),
            ErrorKind::Transient => "the transfer could not be completed, please retry".to_string(),
            ErrorKind::Fatal => "internal server error".to_string(),
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            TransferError::Transient(err)
        } else {
            TransferError::Store(err)
        }
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = TransferError::InsufficientBalance {
            account_id: AccountId::new(1),
            available: dec!(10),
            required: dec!(11.99),
        };
        assert_eq!(err.kind(), ErrorKind::Client);
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");
    }

    #[test]
    fn test_store_conflict_maps_to_transient() {
        let err: TransferError = StoreError::Conflict("deadlock detected".into()).into();
        assert!(matches!(err, TransferError::Transient(_)));
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_fatal_errors_hide_detail() {
        let err: TransferError = StoreError::Database("relation \"accounts\" missing".into()).into();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(err.status_code(), 500);
        assert!(!err.public_message().contains("accounts"));
    }

    #[test]
    fn test_rate_not_found_is_404() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::ngn());
        assert_eq!(TransferError::ExchangeRateNotFound(pair).status_code(), 404);
    }

    #[test]
    fn test_side_constructors() {
        let id = AccountId::new(9);
        assert_eq!(
            TransferError::account_not_found(TransferSide::To, id),
            TransferError::ToAccountNotFound(id)
        );
        assert!(matches!(
            TransferError::currency_mismatch(TransferSide::From, id, Currency::usd(), Currency::eur()),
            TransferError::FromCurrencyMismatch { .. }
        ));
    }
}
