//! Transfer transaction coordinator.
//!
//! One call to [`TransferCoordinator::execute`] moves money between two
//! accounts as a single atomic unit:
//!
//! 1. validate the request against the stored accounts and the current rate
//! 2. open a unit, insert the transfer and its two entries
//! 3. apply both balance deltas in ascending account id order
//! 4. re-read both accounts and commit
//!
//! Validation happens before the unit opens, so rejected requests never need
//! a rollback. Any failure inside the unit rolls the whole unit back. The
//! coordinator never retries on its own; transient failures are surfaced as
//! retryable errors for the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use tallybank_common::{
    AccountId, Currency, CurrencyPair, Result, TransferError, TransferSide,
};
use tallybank_fx::{ExchangeResolver, Resolution};
use tallybank_ledger::{Account, Entry, LedgerStore, LedgerUnit, NewEntry, NewTransfer, Transfer};

use crate::fee::FeePolicy;
use crate::lock_order::{apply_in_order, BalancePosting};
use crate::metrics::{Metrics, SharedMetrics};
use crate::retry::{retry_transient, RetryPolicy};

/// A request to move `amount` of `from_currency` out of `from_account_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Denominated in `from_currency`.
    pub amount: Decimal,
    /// Currency the caller believes the source account holds.
    pub from_currency: Currency,
    /// Currency the caller believes the destination account holds.
    pub to_currency: Currency,
    /// Rate the caller confirmed from a quote, if any.
    #[serde(default)]
    pub expected_rate: Option<Decimal>,
}

impl TransferRequest {
    /// A same-currency transfer.
    pub fn new(from: AccountId, to: AccountId, amount: Decimal, currency: Currency) -> Self {
        Self {
            from_account_id: from,
            to_account_id: to,
            amount,
            from_currency: currency.clone(),
            to_currency: currency,
            expected_rate: None,
        }
    }

    /// A transfer converting `from_currency` into `to_currency`.
    pub fn cross_currency(
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        from_currency: Currency,
        to_currency: Currency,
    ) -> Self {
        Self {
            from_account_id: from,
            to_account_id: to,
            amount,
            from_currency,
            to_currency,
            expected_rate: None,
        }
    }

    /// Require the resolved rate to equal `rate`.
    pub fn with_expected_rate(mut self, rate: Decimal) -> Self {
        self.expected_rate = Some(rate);
        self
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from_currency.clone(), self.to_currency.clone())
    }

    pub fn is_cross_currency(&self) -> bool {
        self.from_currency != self.to_currency
    }
}

/// Everything a completed transfer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub transfer: Transfer,
    /// Source account after the debit.
    pub from_account: Account,
    /// Destination account after the credit.
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// A request for conversion terms ahead of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub amount: Decimal,
}

/// Conversion terms a client confirms before submitting a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub rate: Decimal,
    pub amount_to_send: Decimal,
    pub amount_to_receive: Decimal,
    pub fee: Decimal,
    /// `amount_to_send + fee`.
    pub total_amount: Decimal,
    pub can_transact: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: String,
}

const QUOTE_AVAILABLE: &str = "Exchange rate available for transaction";
const QUOTE_EXPIRED: &str = "Exchange rate expired";

/// Validated terms for one transfer.
#[derive(Debug)]
struct TransferPlan {
    from_account: Account,
    to_account: Account,
    resolution: Resolution,
    fee: Decimal,
}

impl TransferPlan {
    fn debit_total(&self) -> Decimal {
        self.resolution.amount + self.fee
    }
}

/// Orchestrates funds movements over an injected ledger store.
pub struct TransferCoordinator {
    store: Arc<dyn LedgerStore>,
    resolver: Arc<ExchangeResolver>,
    fees: FeePolicy,
    timeout: Option<Duration>,
    metrics: SharedMetrics,
}

impl TransferCoordinator {
    /// Create a coordinator without a default deadline.
    pub fn new(store: Arc<dyn LedgerStore>, resolver: Arc<ExchangeResolver>, fees: FeePolicy) -> Self {
        Self {
            store,
            resolver,
            fees,
            timeout: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Apply `timeout` to every `execute` call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Record into shared metrics.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn fee_policy(&self) -> &FeePolicy {
        &self.fees
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Execute one transfer under the configured deadline, if any.
    pub async fn execute(&self, request: TransferRequest) -> Result<TransferOutcome> {
        self.dispatch(request, self.timeout).await
    }

    /// Execute one transfer that must finish within `timeout`. On expiry the
    /// open unit is dropped, which rolls it back.
    pub async fn execute_within(&self, request: TransferRequest, timeout: Duration) -> Result<TransferOutcome> {
        self.dispatch(request, Some(timeout)).await
    }

    #[instrument(
        skip(self, request),
        fields(
            request_id = %Uuid::now_v7(),
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = %request.amount,
            transfer_id = tracing::field::Empty,
        )
    )]
    async fn dispatch(&self, request: TransferRequest, timeout: Option<Duration>) -> Result<TransferOutcome> {
        self.metrics.transfer_started();
        let result = match timeout {
            Some(timeout) => self.run_within(request, timeout).await,
            None => self.run(request).await,
        };
        self.metrics.transfer_finished(&result);

        match &result {
            Ok(outcome) => {
                Span::current().record("transfer_id", tracing::field::display(outcome.transfer.id));
            }
            Err(err) if err.is_retryable() => warn!(error = %err, "Transfer failed, retryable"),
            Err(err) => debug!(error = %err, code = err.error_code(), "Transfer rejected"),
        }
        result
    }

    /// Execute, retrying transient failures with the identical request.
    pub async fn execute_with_retry(
        &self,
        request: TransferRequest,
        policy: &RetryPolicy,
    ) -> Result<TransferOutcome> {
        let mut attempt = 0u32;
        retry_transient(policy, || {
            attempt += 1;
            if attempt > 1 {
                self.metrics.transfer_retried();
            }
            self.execute(request.clone())
        })
        .await
    }

    /// Conversion terms for a prospective transfer.
    #[instrument(skip(self))]
    pub async fn quote(&self, request: QuoteRequest) -> Result<Quote> {
        ensure_supported(&request.from_currency)?;
        ensure_supported(&request.to_currency)?;
        if request.amount <= Decimal::ZERO {
            return Err(TransferError::InvalidAmount(request.amount));
        }
        ensure_minor_units(request.amount, &request.from_currency)?;

        let resolution = self
            .resolver
            .resolve(&request.from_currency, &request.to_currency, request.amount)
            .await?;
        ensure_receivable(&resolution)?;
        let fee = self.fees.fee(&request.from_currency, &request.to_currency);
        self.metrics.quote_served();

        Ok(Quote {
            from_currency: request.from_currency,
            to_currency: request.to_currency,
            rate: resolution.rate,
            amount_to_send: resolution.amount,
            amount_to_receive: resolution.converted_amount,
            fee,
            total_amount: resolution.amount + fee,
            can_transact: resolution.can_transact,
            expires_at: resolution.expires_at,
            message: if resolution.can_transact {
                QUOTE_AVAILABLE.to_string()
            } else {
                QUOTE_EXPIRED.to_string()
            },
        })
    }

    async fn run_within(&self, request: TransferRequest, timeout: Duration) -> Result<TransferOutcome> {
        match tokio::time::timeout(timeout, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Transfer deadline exceeded, unit rolled back");
                Err(TransferError::DeadlineExceeded(timeout.as_millis() as u64))
            }
        }
    }

    async fn run(&self, request: TransferRequest) -> Result<TransferOutcome> {
        let plan = self.validate(&request).await?;

        let mut unit = self.store.begin().await?;
        match self.post(unit.as_mut(), &request, &plan).await {
            Ok(outcome) => {
                unit.commit().await?;
                info!(
                    transfer_id = %outcome.transfer.id,
                    debit = %plan.debit_total(),
                    credit = %outcome.transfer.converted_amount,
                    rate = %outcome.transfer.exchange_rate,
                    "Transfer committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Checks run in a fixed order; the first failure wins. No writes.
    async fn validate(&self, request: &TransferRequest) -> Result<TransferPlan> {
        if request.from_account_id == request.to_account_id {
            return Err(TransferError::SameAccountTransfer(request.from_account_id));
        }
        if request.amount <= Decimal::ZERO {
            return Err(TransferError::InvalidAmount(request.amount));
        }
        ensure_supported(&request.from_currency)?;
        ensure_supported(&request.to_currency)?;
        ensure_minor_units(request.amount, &request.from_currency)?;

        let from_account = self
            .load_account(TransferSide::From, request.from_account_id, &request.from_currency)
            .await?;
        let to_account = self
            .load_account(TransferSide::To, request.to_account_id, &request.to_currency)
            .await?;

        let resolution = self.resolve_conversion(request).await?;
        ensure_receivable(&resolution)?;
        let fee = self.fees.fee(&request.from_currency, &request.to_currency);

        let plan = TransferPlan {
            from_account,
            to_account,
            resolution,
            fee,
        };
        if !plan.from_account.has_sufficient_funds(plan.debit_total()) {
            return Err(TransferError::InsufficientBalance {
                account_id: plan.from_account.id,
                available: plan.from_account.balance,
                required: plan.debit_total(),
            });
        }

        Ok(plan)
    }

    async fn load_account(&self, side: TransferSide, id: AccountId, declared: &Currency) -> Result<Account> {
        let account = self
            .store
            .get_account(id)
            .await?
            .ok_or_else(|| TransferError::account_not_found(side, id))?;

        if &account.currency != declared {
            return Err(TransferError::currency_mismatch(
                side,
                id,
                account.currency,
                declared.clone(),
            ));
        }
        Ok(account)
    }

    async fn resolve_conversion(&self, request: &TransferRequest) -> Result<Resolution> {
        if !request.is_cross_currency() {
            return Ok(Resolution::identity(request.from_currency.clone(), request.amount));
        }

        let pair = request.pair();
        if let Some(expected) = request.expected_rate {
            if expected <= Decimal::ZERO {
                return Err(TransferError::ExchangeRateZero(pair));
            }
        }

        let resolution = self
            .resolver
            .resolve(&request.from_currency, &request.to_currency, request.amount)
            .await?;

        if !resolution.can_transact {
            return Err(TransferError::ExchangeRateExpired {
                pair,
                expired_at: resolution.expires_at.unwrap_or_else(Utc::now),
            });
        }

        if let Some(expected) = request.expected_rate {
            if expected != resolution.rate {
                return Err(TransferError::ExchangeRateMismatch {
                    pair,
                    quoted: expected,
                    current: resolution.rate,
                });
            }
        }

        Ok(resolution)
    }

    /// The writes of one transfer. Runs inside `unit`; the caller commits or
    /// rolls back.
    async fn post(
        &self,
        unit: &mut dyn LedgerUnit,
        request: &TransferRequest,
        plan: &TransferPlan,
    ) -> Result<TransferOutcome> {
        let from_id = request.from_account_id;
        let to_id = request.to_account_id;
        let debit_total = plan.debit_total();
        let credit = plan.resolution.converted_amount;

        let transfer = unit
            .create_transfer(NewTransfer {
                from_account_id: from_id,
                to_account_id: to_id,
                amount: plan.resolution.amount,
                converted_amount: credit,
                exchange_rate: plan.resolution.rate,
                from_currency: request.from_currency.clone(),
                to_currency: request.to_currency.clone(),
                fee: plan.fee,
            })
            .await?;
        let from_entry = unit.create_entry(NewEntry::debit(from_id, debit_total)).await?;
        let to_entry = unit.create_entry(NewEntry::credit(to_id, credit)).await?;

        let applied = apply_in_order(
            unit,
            BalancePosting::new(from_id, -debit_total),
            BalancePosting::new(to_id, credit),
        )
        .await?;

        // A concurrent debit may have landed between validation and the row
        // lock; the balance returned under the lock is authoritative.
        if let Some(debited) = applied.iter().find(|a| a.posting.account_id == from_id) {
            if debited.new_balance < Decimal::ZERO {
                self.metrics.overdraft_prevented();
                return Err(TransferError::InsufficientBalance {
                    account_id: from_id,
                    available: debited.new_balance + debit_total,
                    required: debit_total,
                });
            }
        }

        let from_account = unit
            .get_account(from_id)
            .await?
            .ok_or_else(|| TransferError::account_not_found(TransferSide::From, from_id))?;
        let to_account = unit
            .get_account(to_id)
            .await?
            .ok_or_else(|| TransferError::account_not_found(TransferSide::To, to_id))?;

        Ok(TransferOutcome {
            transfer,
            from_account,
            to_account,
            from_entry,
            to_entry,
        })
    }
}

fn ensure_supported(currency: &Currency) -> Result<()> {
    if currency.is_supported() {
        Ok(())
    } else {
        Err(TransferError::UnsupportedCurrency(currency.clone()))
    }
}

/// Amounts are posted as-is, so they must already fit the currency's minor units.
fn ensure_minor_units(amount: Decimal, currency: &Currency) -> Result<()> {
    if amount.normalize().scale() > currency.decimal_places() {
        return Err(TransferError::InvalidAmount(amount));
    }
    Ok(())
}

/// A conversion that rounds down to nothing would debit without crediting.
fn ensure_receivable(resolution: &Resolution) -> Result<()> {
    if resolution.converted_amount <= Decimal::ZERO {
        return Err(TransferError::InvalidAmount(resolution.amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use tallybank_common::{ManualClock, StoreError};
    use tallybank_fx::{LedgerRateProvider, ResolverConfig};
    use tallybank_ledger::{FaultPoint, MemoryLedgerStore, MemoryStoreConfig, NewAccount};

    struct Fixture {
        store: MemoryLedgerStore,
        clock: Arc<ManualClock>,
        coordinator: TransferCoordinator,
    }

    fn fixture(fees: FeePolicy) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryLedgerStore::with_clock(MemoryStoreConfig::default(), clock.clone());
        let shared: Arc<dyn LedgerStore> = Arc::new(store.clone());
        let resolver = Arc::new(ExchangeResolver::with_clock(
            Arc::new(LedgerRateProvider::new(shared.clone())),
            ResolverConfig::default(),
            clock.clone(),
        ));
        Fixture {
            store,
            clock,
            coordinator: TransferCoordinator::new(shared, resolver, fees),
        }
    }

    fn open(store: &MemoryLedgerStore, owner: &str, currency: Currency, balance: Decimal) -> Account {
        store.create_account(NewAccount::new(owner, currency, balance))
    }

    #[tokio::test]
    async fn test_same_currency_transfer() {
        let f = fixture(FeePolicy::default());
        let a = open(&f.store, "ada", Currency::usd(), dec!(1000));
        let b = open(&f.store, "bob", Currency::usd(), dec!(500));

        let out = f
            .coordinator
            .execute(TransferRequest::new(a.id, b.id, dec!(100), Currency::usd()))
            .await
            .unwrap();

        assert_eq!(out.from_account.balance, dec!(900));
        assert_eq!(out.to_account.balance, dec!(600));
        assert_eq!(out.transfer.exchange_rate, Decimal::ONE);
        assert_eq!(out.transfer.fee, Decimal::ZERO);
        assert!(out.transfer.is_balanced_with(&out.from_entry, &out.to_entry));
        assert_eq!(out.from_entry.created_at, out.transfer.created_at);
        assert_eq!(out.to_entry.created_at, out.transfer.created_at);
    }

    #[tokio::test]
    async fn test_cross_currency_transfer_charges_fee() {
        let f = fixture(FeePolicy::default());
        let a = open(&f.store, "ada", Currency::usd(), dec!(1000));
        let b = open(&f.store, "bob", Currency::eur(), dec!(0));
        f.store
            .upsert_exchange_rate(CurrencyPair::new(Currency::usd(), Currency::eur()), dec!(0.85));

        let out = f
            .coordinator
            .execute(
                TransferRequest::cross_currency(a.id, b.id, dec!(100), Currency::usd(), Currency::eur())
                    .with_expected_rate(dec!(0.85)),
            )
            .await
            .unwrap();

        assert_eq!(out.transfer.converted_amount, dec!(85.00));
        assert_eq!(out.from_entry.amount, dec!(-101.99));
        assert_eq!(out.to_entry.amount, dec!(85.00));
        assert_eq!(out.from_account.balance, dec!(898.01));
        assert_eq!(out.to_account.balance, dec!(85.00));
    }

    #[tokio::test]
    async fn test_validation_order() {
        let f = fixture(FeePolicy::default());
        let a = open(&f.store, "ada", Currency::usd(), dec!(10));
        let missing = AccountId::new(404);

        // Same account beats a bad amount.
        let err = f
            .coordinator
            .execute(TransferRequest::new(a.id, a.id, dec!(-1), Currency::usd()))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::SameAccountTransfer(a.id));

        // Bad amount beats a missing account.
        let err = f
            .coordinator
            .execute(TransferRequest::new(missing, a.id, dec!(0), Currency::usd()))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidAmount(dec!(0)));

        let err = f
            .coordinator
            .execute(TransferRequest::new(missing, a.id, dec!(1), Currency::new("JPY")))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::UnsupportedCurrency(Currency::new("JPY")));

        let err = f
            .coordinator
            .execute(TransferRequest::new(missing, a.id, dec!(1), Currency::usd()))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::FromAccountNotFound(missing));

        let err = f
            .coordinator
            .execute(TransferRequest::new(a.id, missing, dec!(1), Currency::usd()))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::ToAccountNotFound(missing));
    }

    #[tokio::test]
    async fn test_currency_mismatch_per_side() {
        let f = fixture(FeePolicy::default());
        let a = open(&f.store, "ada", Currency::usd(), dec!(10));
        let b = open(&f.store, "bob", Currency::gbp(), dec!(10));

        let err = f
            .coordinator
            .execute(TransferRequest::new(a.id, b.id, dec!(1), Currency::usd()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ToCurrencyMismatch { .. }));

        let err = f
            .coordinator
            .execute(TransferRequest::cross_currency(a.id, b.id, dec!(1), Currency::eur(), Currency::gbp()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::FromCurrencyMismatch { .. }));
    }

    #[tokio::test]
    async fn test_rate_errors() {
        let f = fixture(FeePolicy::default());
        let a = open(&f.store, "ada", Currency::usd(), dec!(1000));
        let b = open(&f.store, "bob", Currency::ngn(), dec!(0));
        let request = TransferRequest::cross_currency(a.id, b.id, dec!(10), Currency::usd(), Currency::ngn());

        let err = f.coordinator.execute(request.clone()).await.unwrap_err();
        assert!(matches!(err, TransferError::ExchangeRateNotFound(_)));
        assert_eq!(err.status_code(), 404);

        f.store
            .upsert_exchange_rate(CurrencyPair::new(Currency::usd(), Currency::ngn()), dec!(1500));

        let err = f
            .coordinator
            .execute(request.clone().with_expected_rate(dec!(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ExchangeRateZero(_)));

        let err = f
            .coordinator
            .execute(request.clone().with_expected_rate(dec!(1400)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ExchangeRateMismatch { .. }));

        f.clock.advance(ChronoDuration::minutes(61));
        let err = f.coordinator.execute(request).await.unwrap_err();
        assert!(matches!(err, TransferError::ExchangeRateExpired { .. }));
        assert_eq!(f.store.transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_balance_includes_fee() {
        let f = fixture(FeePolicy::new(dec!(1.99), crate::fee::FeeMode::Always));
        let a = open(&f.store, "ada", Currency::usd(), dec!(100));
        let b = open(&f.store, "bob", Currency::usd(), dec!(0));

        let err = f
            .coordinator
            .execute(TransferRequest::new(a.id, b.id, dec!(100), Currency::usd()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::InsufficientBalance {
                account_id: a.id,
                available: dec!(100),
                required: dec!(101.99),
            }
        );
    }

    #[tokio::test]
    async fn test_fault_inside_unit_rolls_back() {
        for point in [FaultPoint::CreateTransfer, FaultPoint::CreateEntry, FaultPoint::AddBalance, FaultPoint::Commit] {
            let f = fixture(FeePolicy::default());
            let a = open(&f.store, "ada", Currency::usd(), dec!(100));
            let b = open(&f.store, "bob", Currency::usd(), dec!(100));
            let entries_before = f.store.entry_count();

            f.store.fail_next(point, StoreError::Conflict("deadlock detected".into()));
            let err = f
                .coordinator
                .execute(TransferRequest::new(a.id, b.id, dec!(10), Currency::usd()))
                .await
                .unwrap_err();

            assert!(err.is_retryable(), "{:?} should be retryable", point);
            assert_eq!(f.store.transfer_count(), 0);
            assert_eq!(f.store.entry_count(), entries_before);
            assert_eq!(f.store.get_account(a.id).await.unwrap().unwrap().balance, dec!(100));
            assert_eq!(f.store.get_account(b.id).await.unwrap().unwrap().balance, dec!(100));
        }
    }

    #[tokio::test]
    async fn test_fatal_store_error_is_not_retryable() {
        let f = fixture(FeePolicy::default());
        let a = open(&f.store, "ada", Currency::usd(), dec!(100));
        let b = open(&f.store, "bob", Currency::usd(), dec!(100));

        f.store.fail_next(FaultPoint::CreateEntry, StoreError::Unavailable("connection reset".into()));
        let err = f
            .coordinator
            .execute(TransferRequest::new(a.id, b.id, dec!(10), Currency::usd()))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), 500);
        assert!(!err.public_message().contains("connection"));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_conflict() {
        let f = fixture(FeePolicy::default());
        let a = open(&f.store, "ada", Currency::usd(), dec!(100));
        let b = open(&f.store, "bob", Currency::usd(), dec!(100));

        f.store.fail_next(FaultPoint::AddBalance, StoreError::Conflict("deadlock detected".into()));
        let out = f
            .coordinator
            .execute_with_retry(
                TransferRequest::new(a.id, b.id, dec!(10), Currency::usd()),
                &RetryPolicy::new(3, std::time::Duration::from_millis(1)),
            )
            .await
            .unwrap();

        assert_eq!(out.from_account.balance, dec!(90));
        assert_eq!(f.store.transfer_count(), 1);
        let snapshot = f.coordinator.metrics().snapshot();
        assert_eq!(snapshot.transfers_retried, 1);
        assert_eq!(snapshot.transfers_transient, 1);
        assert_eq!(snapshot.transfers_completed, 1);
    }

    #[tokio::test]
    async fn test_quote() {
        let f = fixture(FeePolicy::default());
        f.store
            .upsert_exchange_rate(CurrencyPair::new(Currency::gbp(), Currency::usd()), dec!(1.27));

        let quote = f
            .coordinator
            .quote(QuoteRequest {
                from_currency: Currency::gbp(),
                to_currency: Currency::usd(),
                amount: dec!(200),
            })
            .await
            .unwrap();
        assert_eq!(quote.amount_to_receive, dec!(254.00));
        assert_eq!(quote.fee, dec!(1.99));
        assert_eq!(quote.total_amount, dec!(201.99));
        assert!(quote.can_transact);
        assert_eq!(quote.message, QUOTE_AVAILABLE);

        f.clock.advance(ChronoDuration::minutes(60));
        let quote = f
            .coordinator
            .quote(QuoteRequest {
                from_currency: Currency::gbp(),
                to_currency: Currency::usd(),
                amount: dec!(200),
            })
            .await
            .unwrap();
        assert!(!quote.can_transact);
        assert_eq!(quote.message, QUOTE_EXPIRED);
    }

    #[tokio::test]
    async fn test_same_currency_quote() {
        let f = fixture(FeePolicy::default());
        let quote = f
            .coordinator
            .quote(QuoteRequest {
                from_currency: Currency::eur(),
                to_currency: Currency::eur(),
                amount: dec!(12.34),
            })
            .await
            .unwrap();

        assert_eq!(quote.rate, Decimal::ONE);
        assert_eq!(quote.amount_to_receive, dec!(12.34));
        assert_eq!(quote.fee, Decimal::ZERO);
        assert!(quote.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_quote_checks_currency_before_amount() {
        let f = fixture(FeePolicy::default());
        let err = f
            .coordinator
            .quote(QuoteRequest {
                from_currency: Currency::new("JPY"),
                to_currency: Currency::usd(),
                amount: Decimal::ZERO,
            })
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::UnsupportedCurrency(Currency::new("JPY")));

        let err = f
            .coordinator
            .quote(QuoteRequest {
                from_currency: Currency::usd(),
                to_currency: Currency::usd(),
                amount: dec!(1.001),
            })
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidAmount(dec!(1.001)));
    }

    #[tokio::test]
    async fn test_execute_within_shares_bookkeeping() {
        let f = fixture(FeePolicy::default());
        let a = open(&f.store, "ada", Currency::usd(), dec!(100));
        let b = open(&f.store, "bob", Currency::usd(), dec!(0));

        f.coordinator
            .execute_within(
                TransferRequest::new(a.id, b.id, dec!(30), Currency::usd()),
                std::time::Duration::from_secs(5),
            )
            .await
            .unwrap();
        let err = f
            .coordinator
            .execute_within(
                TransferRequest::new(a.id, b.id, dec!(0.001), Currency::usd()),
                std::time::Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_AMOUNT");

        let snapshot = f.coordinator.metrics().snapshot();
        assert_eq!(snapshot.transfers_total, 2);
        assert_eq!(snapshot.transfers_completed, 1);
        assert_eq!(snapshot.transfers_rejected, 1);
        assert_eq!(snapshot.transfers_active, 0);
    }
}
