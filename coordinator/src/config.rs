//! Coordinator configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use tallybank_fx::{ExpiryPolicy, ResolverConfig, RoundingStrategy};
use tallybank_ledger::PgStoreConfig;

use crate::fee::{FeeMode, FeePolicy};
use crate::retry::RetryPolicy;

/// Fee configuration.
#[derive(Debug, Clone)]
pub struct FeeConfig {
    /// Flat fee in the source currency.
    pub flat_fee: Decimal,
    /// Which transfers pay it.
    pub mode: FeeMode,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            flat_fee: Decimal::new(199, 2),
            mode: FeeMode::CrossCurrencyOnly,
        }
    }
}

/// Exchange rate configuration.
#[derive(Debug, Clone)]
pub struct RateConfig {
    /// Minutes a rate stays usable after its last refresh.
    pub expiry_minutes: i64,
    /// Rounding of converted amounts.
    pub rounding: RoundingStrategy,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            expiry_minutes: 60,
            rounding: RoundingStrategy::HalfUp,
        }
    }
}

/// Transfer execution configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Deadline for one `execute` call.
    pub timeout: Duration,
    /// Attempts made by `execute_with_retry`, including the first.
    pub retry_attempts: u32,
    /// Backoff before the first retry; doubles per retry.
    pub retry_backoff: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Main coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Database URL.
    pub database_url: String,
    /// Connection pool size.
    pub db_max_connections: u32,
    /// Row lock wait before the database reports a conflict.
    pub db_lock_timeout_ms: Option<u64>,
    /// Fee configuration.
    pub fee: FeeConfig,
    /// Exchange rate configuration.
    pub rates: RateConfig,
    /// Transfer execution configuration.
    pub transfer: TransferConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/tallybank".to_string(),
            db_max_connections: 10,
            db_lock_timeout_ms: None,
            fee: FeeConfig::default(),
            rates: RateConfig::default(),
            transfer: TransferConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(max) = std::env::var("DB_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.db_max_connections = max;
            }
        }

        if let Ok(ms) = std::env::var("DB_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.db_lock_timeout_ms = Some(ms);
            }
        }

        if let Ok(minutes) = std::env::var("EXCHANGE_RATE_EXPIRED_TIME_IN_MINUTES") {
            if let Ok(minutes) = minutes.parse() {
                config.rates.expiry_minutes = minutes;
            }
        }

        if let Ok(rounding) = std::env::var("CONVERSION_ROUNDING") {
            if let Ok(rounding) = rounding.parse() {
                config.rates.rounding = rounding;
            }
        }

        if let Ok(fee) = std::env::var("MULTI_CURRENCY_FEE") {
            if let Ok(fee) = fee.parse() {
                config.fee.flat_fee = fee;
            }
        }

        if let Ok(mode) = std::env::var("FEE_MODE") {
            if let Ok(mode) = mode.parse() {
                config.fee.mode = mode;
            }
        }

        if let Ok(ms) = std::env::var("TRANSFER_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.transfer.timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(attempts) = std::env::var("TRANSFER_RETRY_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                config.transfer.retry_attempts = attempts;
            }
        }

        if let Ok(ms) = std::env::var("TRANSFER_RETRY_BACKOFF_MS") {
            if let Ok(ms) = ms.parse() {
                config.transfer.retry_backoff = Duration::from_millis(ms);
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.db_max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        if self.rates.expiry_minutes <= 0 {
            return Err("Exchange rate expiry must be positive".to_string());
        }

        if self.fee.flat_fee.is_sign_negative() {
            return Err("Fee cannot be negative".to_string());
        }

        if self.transfer.timeout.is_zero() {
            return Err("Transfer timeout cannot be 0".to_string());
        }

        if self.transfer.retry_attempts == 0 {
            return Err("Retry attempts must include the first attempt".to_string());
        }

        Ok(())
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy::new(self.fee.flat_fee, self.fee.mode)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            expiry: ExpiryPolicy::from_minutes(self.rates.expiry_minutes),
            rounding: self.rates.rounding,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.transfer.retry_attempts, self.transfer.retry_backoff)
    }

    pub fn store_config(&self) -> PgStoreConfig {
        PgStoreConfig {
            max_connections: self.db_max_connections,
            lock_timeout_ms: self.db_lock_timeout_ms,
            ..PgStoreConfig::new(self.database_url.clone())
        }
    }
}
