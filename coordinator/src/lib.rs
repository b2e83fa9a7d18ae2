//! Tallybank Coordinator
//!
//! The transfer coordinator moves money between ledger accounts, converting
//! currency when the two sides differ, as one all-or-nothing unit that is
//! safe under concurrent transfers touching the same accounts.

pub mod coordinator;
pub mod config;
pub mod fee;
pub mod lock_order;
pub mod retry;
pub mod metrics;

pub use coordinator::{Quote, QuoteRequest, TransferCoordinator, TransferOutcome, TransferRequest};
pub use config::CoordinatorConfig;
pub use fee::{FeeMode, FeePolicy};
pub use lock_order::{ordered_postings, BalancePosting};
pub use retry::{retry_transient, RetryPolicy};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
