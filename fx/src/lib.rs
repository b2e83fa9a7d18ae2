//! Tallybank FX
//!
//! Exchange rate resolution for cross-currency transfers.
//!
//! # Features
//!
//! - Direction-specific rate lookup through a pluggable [`RateProvider`]
//! - Expiry derived from the rate's last refresh plus a configured TTL
//! - Configurable rounding of converted amounts to minor units
//!
//! # Example
//!
//! ```rust,ignore
//! use tallybank_fx::{ExchangeResolver, LedgerRateProvider, ResolverConfig};
//! use tallybank_common::Currency;
//!
//! let provider = Arc::new(LedgerRateProvider::new(store));
//! let resolver = ExchangeResolver::new(provider, ResolverConfig::default());
//!
//! let resolution = resolver
//!     .resolve(&Currency::usd(), &Currency::eur(), dec!(100))
//!     .await?;
//! assert!(resolution.can_transact);
//! ```

pub mod engine;
pub mod provider;
pub mod policy;
pub mod conversion;
pub mod error;

pub use engine::{ExchangeResolver, RateView, ResolverConfig};
pub use provider::{LedgerRateProvider, RateProvider};
#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
pub use policy::ExpiryPolicy;
pub use conversion::{convert, Resolution, RoundingStrategy};
pub use error::{FxError, FxResult};
