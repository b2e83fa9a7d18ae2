//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::Serialize;

/// Client-side view of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Transfers attempted.
    pub total_transfers: u64,
    /// Transfers committed.
    pub completed_transfers: u64,
    /// Transfers that failed, by error code.
    pub failures: BTreeMap<&'static str, u64>,
    /// Latency samples (ms).
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self {
            total_transfers: 0,
            completed_transfers: 0,
            failures: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a committed transfer.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_transfers += 1;
        self.completed_transfers += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency.as_millis() as u64);
    }

    /// Record a failed transfer.
    pub fn record_failure(&mut self, code: &'static str) {
        self.total_transfers += 1;
        *self.failures.entry(code).or_insert(0) += 1;
    }

    pub fn failed_transfers(&self) -> u64 {
        self.failures.values().sum()
    }

    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p50_latency_ms(&self) -> u64 {
        self.percentile_latency(50)
    }

    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }

        self.completed_transfers as f64 / self.total_transfers as f64
    }

    /// Committed transfers per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }

        self.completed_transfers as f64 / secs
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(200));
        metrics.record_success(Duration::from_millis(150));
        metrics.record_failure("INSUFFICIENT_BALANCE");

        assert_eq!(metrics.total_transfers, 4);
        assert_eq!(metrics.completed_transfers, 3);
        assert_eq!(metrics.failed_transfers(), 1);
        assert_eq!(metrics.failures["INSUFFICIENT_BALANCE"], 1);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p50_latency_ms(), 150);
        assert_eq!(metrics.success_rate(), 0.75);
        assert_eq!(metrics.throughput(Duration::from_secs(3)), 1.0);
    }
}
