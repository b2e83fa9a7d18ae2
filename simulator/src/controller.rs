//! Simulation controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use tallybank_common::{AccountId, ManualClock, Result as TransferResult};
use tallybank_coordinator::{
    FeePolicy, MetricsSnapshot, RetryPolicy, TransferCoordinator, TransferOutcome, TransferRequest,
};
use tallybank_fx::{ExchangeResolver, LedgerRateProvider, ResolverConfig};
use tallybank_ledger::{verify_account, LedgerStore, MemoryLedgerStore, MemoryStoreConfig};

use crate::bank::{BankFactory, SimulatedCustomer};
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};

/// Knobs for one simulation.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub seed: Option<u64>,
    pub fees: FeePolicy,
    pub store: MemoryStoreConfig,
    pub retry: RetryPolicy,
    /// Deadline for each transfer attempt.
    pub transfer_timeout: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            fees: FeePolicy::default(),
            store: MemoryStoreConfig::default(),
            retry: RetryPolicy::default(),
            transfer_timeout: Duration::from_secs(5),
        }
    }
}

/// Drives transfers through a coordinator over an in-memory ledger.
pub struct SimulationController {
    store: MemoryLedgerStore,
    clock: Arc<ManualClock>,
    coordinator: Arc<TransferCoordinator>,
    retry: RetryPolicy,
    rng: Mutex<StdRng>,
    customers: RwLock<Vec<SimulatedCustomer>>,
    /// Balances implied by the committed transfers the simulator saw.
    expected: Mutex<BTreeMap<AccountId, Decimal>>,
    metrics: RwLock<SimulationMetrics>,
}

impl SimulationController {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryLedgerStore::with_clock(config.store, clock.clone());
        let shared: Arc<dyn LedgerStore> = Arc::new(store.clone());
        let resolver = Arc::new(ExchangeResolver::with_clock(
            Arc::new(LedgerRateProvider::new(shared.clone())),
            ResolverConfig::default(),
            clock.clone(),
        ));
        let coordinator = TransferCoordinator::new(shared, resolver, config.fees)
            .with_timeout(config.transfer_timeout);

        Self {
            store,
            clock,
            coordinator: Arc::new(coordinator),
            retry: config.retry,
            rng: Mutex::new(rng),
            customers: RwLock::new(Vec::new()),
            expected: Mutex::new(BTreeMap::new()),
            metrics: RwLock::new(SimulationMetrics::new()),
        }
    }

    /// Open customers and seed exchange rates.
    pub async fn initialize(&self, count: usize, opening_balance: Decimal, multi_currency: bool) {
        info!(count, %opening_balance, multi_currency, "Opening customer accounts");

        let opened = BankFactory::open_customers(&self.store, count, opening_balance, multi_currency);
        BankFactory::seed_rates(&self.store);

        let mut expected = self.expected.lock().await;
        for customer in &opened {
            debug!(name = %customer.name, account_id = %customer.id(), currency = %customer.currency(), "Customer opened");
            expected.insert(customer.id(), customer.account.balance);
        }
        self.customers.write().await.extend(opened);
    }

    /// Run a scenario from a fresh set of customers.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);
        self.initialize(scenario.customers, scenario.opening_balance, scenario.multi_currency)
            .await;

        for (index, step) in scenario.steps.iter().enumerate() {
            self.execute_step(step)
                .await
                .map_err(|e| anyhow::anyhow!("step {} ({:?}) failed: {}", index + 1, step, e))?;
        }

        Ok(())
    }

    /// Random transfers from `workers` concurrent tasks until `duration`
    /// elapses, or until Ctrl+C when no duration is given.
    pub async fn run(
        self: &Arc<Self>,
        workers: usize,
        max_amount: u32,
        duration: Option<Duration>,
    ) -> anyhow::Result<Duration> {
        info!(workers, max_amount, "Running random load");
        let started = Instant::now();
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let controller = self.clone();
                let stop = stop_rx.clone();
                tokio::spawn(async move {
                    while !*stop.borrow() {
                        if let Some(request) = controller.random_transfer(max_amount).await {
                            let _ = controller.submit(request).await;
                        }
                        tokio::task::yield_now().await;
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::signal::ctrl_c().await?,
        }
        let _ = stop_tx.send(true);

        for handle in handles {
            handle.await?;
        }
        Ok(started.elapsed())
    }

    async fn random_transfer(&self, max_amount: u32) -> Option<TransferRequest> {
        let count = self.customers.read().await.len();
        if count < 2 {
            return None;
        }

        let (from, to, cents) = {
            let mut rng = self.rng.lock().await;
            let from = rng.gen_range(0..count);
            let mut to = rng.gen_range(0..count);
            while to == from {
                to = rng.gen_range(0..count);
            }
            (from, to, rng.gen_range(1..=i64::from(max_amount.max(1)) * 100))
        };
        self.request(from, to, Decimal::new(cents, 2)).await.ok()
    }

    /// A request moving `amount` of the sender's currency into the
    /// receiver's currency.
    pub async fn request(&self, from: usize, to: usize, amount: Decimal) -> anyhow::Result<TransferRequest> {
        let customers = self.customers.read().await;
        let sender = customers
            .get(from)
            .ok_or_else(|| anyhow::anyhow!("no customer {}", from))?;
        let receiver = customers
            .get(to)
            .ok_or_else(|| anyhow::anyhow!("no customer {}", to))?;

        Ok(TransferRequest::cross_currency(
            sender.id(),
            receiver.id(),
            amount,
            sender.currency().clone(),
            receiver.currency().clone(),
        ))
    }

    /// Execute `request`, retrying transient failures, and account for the
    /// outcome.
    pub async fn submit(&self, request: TransferRequest) -> TransferResult<TransferOutcome> {
        let started = Instant::now();
        let result = self.coordinator.execute_with_retry(request, &self.retry).await;

        match &result {
            Ok(outcome) => {
                let transfer = &outcome.transfer;
                {
                    let mut expected = self.expected.lock().await;
                    *expected.entry(transfer.from_account_id).or_default() -= transfer.debit_total();
                    *expected.entry(transfer.to_account_id).or_default() += transfer.converted_amount;
                }
                self.metrics.write().await.record_success(started.elapsed());
            }
            Err(err) => {
                debug!(error = %err, code = err.error_code(), "Transfer did not complete");
                self.metrics.write().await.record_failure(err.error_code());
            }
        }
        result
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Transfer {
                from,
                to,
                amount,
                expect_error,
            } => {
                let request = self.request(*from, *to, *amount).await?;
                let result = self.submit(request).await;
                match (result, expect_error) {
                    (Ok(outcome), None) => {
                        info!(transfer_id = %outcome.transfer.id, "Transfer completed");
                    }
                    (Err(err), Some(code)) if err.error_code() == code => {
                        info!(code = %code, "Transfer rejected as expected");
                    }
                    (Ok(outcome), Some(code)) => {
                        anyhow::bail!("expected {} but transfer {} completed", code, outcome.transfer.id);
                    }
                    (Err(err), _) => {
                        anyhow::bail!("unexpected failure {}: {}", err.error_code(), err);
                    }
                }
            }
            ScenarioStep::Burst {
                from,
                to,
                amount,
                count,
            } => {
                let request = self.request(*from, *to, *amount).await?;
                let results =
                    futures::future::join_all((0..*count).map(|_| self.submit(request.clone()))).await;
                let completed = results.iter().filter(|r| r.is_ok()).count();
                info!(completed, submitted = count, "Burst finished");
            }
            ScenarioStep::AdvanceClock { minutes } => {
                self.clock.advance(chrono::Duration::minutes(*minutes));
                info!(minutes, "Clock advanced");
            }
            ScenarioStep::RefreshRates => {
                BankFactory::seed_rates(&self.store);
                info!("Exchange rates refreshed");
            }
            ScenarioStep::InjectFault { fault, transient } => {
                info!(?fault, transient, "Injecting fault");
                self.store.fail_next(fault.point(), fault.error(*transient));
            }
            ScenarioStep::Assert { condition } => self.check(condition).await?,
        }

        Ok(())
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::BalanceEquals { customer, amount } => {
                let id = self
                    .customers
                    .read()
                    .await
                    .get(*customer)
                    .map(|c| c.id())
                    .ok_or_else(|| anyhow::anyhow!("no customer {}", customer))?;
                let account = self
                    .store
                    .get_account(id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("account {} missing", id))?;
                if account.balance != *amount {
                    anyhow::bail!("customer {} holds {}, expected {}", customer, account.balance, amount);
                }
            }
            AssertCondition::TransferCount { count } => {
                let actual = self.store.transfer_count();
                if actual != *count {
                    anyhow::bail!("{} transfers committed, expected {}", actual, count);
                }
            }
            AssertCondition::LedgerConsistent => self.verify_ledger().await?,
        }
        info!(?condition, "Assertion held");
        Ok(())
    }

    /// Check every customer's balance against its entries, against the
    /// transfers the simulator saw commit, and for overdraft.
    pub async fn verify_ledger(&self) -> anyhow::Result<()> {
        let expected = self.expected.lock().await.clone();
        for (id, implied) in expected {
            let audit = verify_account(&self.store, id).await?;
            if !audit.is_consistent {
                anyhow::bail!("account {} drifted from its entries by {}", id, audit.drift());
            }
            if audit.stored_balance != implied {
                anyhow::bail!(
                    "account {} holds {}, committed transfers imply {}",
                    id,
                    audit.stored_balance,
                    implied
                );
            }
            if audit.stored_balance < Decimal::ZERO {
                anyhow::bail!("account {} is overdrawn at {}", id, audit.stored_balance);
            }
        }
        Ok(())
    }

    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    pub fn coordinator_metrics(&self) -> MetricsSnapshot {
        self.coordinator.metrics().snapshot()
    }

    pub fn prometheus(&self) -> String {
        self.coordinator.metrics().to_prometheus()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn controller() -> SimulationController {
        SimulationController::new(SimulationConfig {
            seed: Some(7),
            retry: RetryPolicy::new(5, Duration::from_millis(1)),
            ..SimulationConfig::default()
        })
    }

    #[tokio::test]
    async fn test_builtin_scenarios_pass() {
        for name in Scenario::builtin_names() {
            let scenario = Scenario::load(name).unwrap();
            controller().run_scenario(&scenario).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_assertion_is_reported() {
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "asserts a balance that cannot hold".to_string(),
            customers: 2,
            opening_balance: dec!(10),
            multi_currency: false,
            steps: vec![ScenarioStep::Assert {
                condition: AssertCondition::BalanceEquals {
                    customer: 0,
                    amount: dec!(11),
                },
            }],
        };

        assert!(controller().run_scenario(&scenario).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_random_load_conserves_balances() {
        let controller = Arc::new(controller());
        controller.initialize(6, dec!(200), true).await;

        controller
            .run(4, 50, Some(Duration::from_millis(200)))
            .await
            .unwrap();

        controller.verify_ledger().await.unwrap();
        let metrics = controller.metrics().await;
        assert!(metrics.total_transfers > 0);
        assert_eq!(
            controller.coordinator_metrics().transfers_completed,
            metrics.completed_transfers
        );
    }
}
