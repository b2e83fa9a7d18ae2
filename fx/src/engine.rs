//! Exchange resolver.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tallybank_common::{Clock, Currency, CurrencyPair, ExchangeRate, SystemClock};
use tracing::{debug, instrument, warn};

use crate::conversion::{convert, Resolution, RoundingStrategy};
use crate::error::{FxError, FxResult};
use crate::policy::ExpiryPolicy;
use crate::provider::RateProvider;

/// Configuration for the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Rate time-to-live.
    pub expiry: ExpiryPolicy,
    /// Rounding of converted amounts.
    pub rounding: RoundingStrategy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            expiry: ExpiryPolicy::default(),
            rounding: RoundingStrategy::HalfUp,
        }
    }
}

/// A stored rate together with its derived expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateView {
    pub rate: ExchangeRate,
    pub expires_at: DateTime<Utc>,
    pub can_transact: bool,
}

/// Resolves conversion terms for an ordered currency pair.
pub struct ExchangeResolver {
    provider: Arc<dyn RateProvider>,
    config: ResolverConfig,
    clock: Arc<dyn Clock>,
}

impl ExchangeResolver {
    /// Create a resolver on the wall clock.
    pub fn new(provider: Arc<dyn RateProvider>, config: ResolverConfig) -> Self {
        Self::with_clock(provider, config, Arc::new(SystemClock))
    }

    /// Create a resolver that reads time from `clock`.
    pub fn with_clock(
        provider: Arc<dyn RateProvider>,
        config: ResolverConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve the rate and converted amount for `amount` of `from` into `to`.
    ///
    /// Same-currency requests resolve to rate 1 without touching the
    /// provider. An expired rate still resolves, with `can_transact` false;
    /// the caller decides whether that is an error.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn resolve(&self, from: &Currency, to: &Currency, amount: Decimal) -> FxResult<Resolution> {
        if from == to {
            return Ok(Resolution::identity(from.clone(), amount));
        }

        let pair = CurrencyPair::new(from.clone(), to.clone());
        let stored = self.provider.get_rate(&pair).await?;
        if stored.rate <= Decimal::ZERO {
            warn!(pair = %pair, rate = %stored.rate, "Stored rate is not positive");
            return Err(FxError::ZeroRate(pair));
        }

        let now = self.clock.now();
        let expires_at = self.config.expiry.expires_at(&stored);
        let can_transact = self.config.expiry.can_transact(&stored, now);
        let converted_amount = convert(amount, stored.rate, to, self.config.rounding);

        debug!(
            pair = %pair,
            rate = %stored.rate,
            converted = %converted_amount,
            can_transact,
            "Resolved conversion"
        );

        Ok(Resolution {
            pair,
            rate: stored.rate,
            amount,
            converted_amount,
            can_transact,
            updated_at: Some(stored.updated_at),
            expires_at: Some(expires_at),
        })
    }

    /// Like [`resolve`](Self::resolve), but an expired rate is an error.
    pub async fn resolve_transactable(
        &self,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
    ) -> FxResult<Resolution> {
        let resolution = self.resolve(from, to, amount).await?;
        match (resolution.can_transact, resolution.expires_at) {
            (false, Some(expired_at)) => Err(FxError::RateExpired {
                pair: resolution.pair,
                expired_at,
            }),
            _ => Ok(resolution),
        }
    }

    /// Every stored rate with its expiry as of now.
    pub async fn list_rates(&self) -> FxResult<Vec<RateView>> {
        let now = self.clock.now();
        let rates = self.provider.list_rates().await?;
        Ok(rates
            .into_iter()
            .map(|rate| RateView {
                expires_at: self.config.expiry.expires_at(&rate),
                can_transact: self.config.expiry.can_transact(&rate, now),
                rate,
            })
            .collect())
    }
}
