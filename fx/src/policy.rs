//! Rate expiry policy.

use chrono::{DateTime, Duration, Utc};
use tallybank_common::{is_expired_at, ExchangeRate};

/// Derives a rate's expiry from its last refresh.
///
/// Expiry is never stored: `expires_at = updated_at + ttl`, and a rate is
/// usable only while `now < expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    ttl: Duration,
}

impl ExpiryPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn from_minutes(minutes: i64) -> Self {
        Self::new(Duration::minutes(minutes))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn expires_at(&self, rate: &ExchangeRate) -> DateTime<Utc> {
        rate.updated_at + self.ttl
    }

    pub fn can_transact(&self, rate: &ExchangeRate, now: DateTime<Utc>) -> bool {
        !is_expired_at(self.expires_at(rate), now)
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::from_minutes(60)
    }
}
