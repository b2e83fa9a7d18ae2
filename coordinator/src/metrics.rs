//! Metrics collection for transfer monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tallybank_common::{ErrorKind, TransferError};

/// Coordinator metrics.
pub struct Metrics {
    /// Transfers submitted to `execute`.
    pub transfers_total: AtomicU64,
    /// Transfers committed.
    pub transfers_completed: AtomicU64,
    /// Transfers rejected with a client error.
    pub transfers_rejected: AtomicU64,
    /// Transfers that failed with a retryable error.
    pub transfers_transient: AtomicU64,
    /// Transfers that failed with a fatal error.
    pub transfers_failed: AtomicU64,
    /// Retries issued by `execute_with_retry`.
    pub transfers_retried: AtomicU64,
    /// Units rolled back by the in-unit overdraft check.
    pub overdrafts_prevented: AtomicU64,
    /// Transfers currently inside `execute`.
    pub transfers_active: AtomicU64,
    /// Quotes served.
    pub quotes_total: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            transfers_total: AtomicU64::new(0),
            transfers_completed: AtomicU64::new(0),
            transfers_rejected: AtomicU64::new(0),
            transfers_transient: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            transfers_retried: AtomicU64::new(0),
            overdrafts_prevented: AtomicU64::new(0),
            transfers_active: AtomicU64::new(0),
            quotes_total: AtomicU64::new(0),
        }
    }

    pub fn transfer_started(&self) {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a started transfer ended.
    pub fn transfer_finished<T>(&self, result: &Result<T, TransferError>) {
        self.transfers_active.fetch_sub(1, Ordering::Relaxed);
        let counter = match result {
            Ok(_) => &self.transfers_completed,
            Err(err) => match err.kind() {
                ErrorKind::Client => &self.transfers_rejected,
                ErrorKind::Transient => &self.transfers_transient,
                ErrorKind::Fatal => &self.transfers_failed,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_retried(&self) {
        self.transfers_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overdraft_prevented(&self) {
        self.overdrafts_prevented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn quote_served(&self) {
        self.quotes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            transfers_transient: self.transfers_transient.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_retried: self.transfers_retried.load(Ordering::Relaxed),
            overdrafts_prevented: self.overdrafts_prevented.load(Ordering::Relaxed),
            transfers_active: self.transfers_active.load(Ordering::Relaxed),
            quotes_total: self.quotes_total.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let rows: [(&str, &str, &str, u64); 9] = [
            ("transfers_total", "counter", "Total transfers submitted", s.transfers_total),
            ("transfers_completed", "counter", "Total transfers committed", s.transfers_completed),
            ("transfers_rejected", "counter", "Total transfers rejected by validation", s.transfers_rejected),
            ("transfers_transient", "counter", "Total transfers failed with a retryable error", s.transfers_transient),
            ("transfers_failed", "counter", "Total transfers failed with a fatal error", s.transfers_failed),
            ("transfers_retried", "counter", "Total transfer retries", s.transfers_retried),
            ("overdrafts_prevented", "counter", "Total units rolled back by the overdraft check", s.overdrafts_prevented),
            ("transfers_active", "gauge", "Current transfers in progress", s.transfers_active),
            ("quotes_total", "counter", "Total quotes served", s.quotes_total),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in rows {
            out.push_str(&format!(
                "# HELP tallybank_{name} {help}\n# TYPE tallybank_{name} {kind}\ntallybank_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub transfers_total: u64,
    pub transfers_completed: u64,
    pub transfers_rejected: u64,
    pub transfers_transient: u64,
    pub transfers_failed: u64,
    pub transfers_retried: u64,
    pub overdrafts_prevented: u64,
    pub transfers_active: u64,
    pub quotes_total: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
