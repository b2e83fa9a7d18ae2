//! Account balance integrity checks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use tallybank_common::{AccountId, StoreError, StoreResult};

use crate::store::LedgerStore;

/// Result of reconciling an account's stored balance against its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAudit {
    /// Account checked.
    pub account_id: AccountId,
    /// Balance column as stored.
    pub stored_balance: Decimal,
    /// Running sum of every entry posted to the account.
    pub entries_total: Decimal,
    /// Whether the two agree.
    pub is_consistent: bool,
}

impl BalanceAudit {
    /// Stored balance minus the entry sum.
    pub fn drift(&self) -> Decimal {
        self.stored_balance - self.entries_total
    }
}

/// Recompute an account's balance from its entries and compare it with the
/// stored balance. Opening balances are posted as entries, so a healthy
/// account always reconciles to zero drift.
pub async fn verify_account(store: &dyn LedgerStore, account_id: AccountId) -> StoreResult<BalanceAudit> {
    let account = store
        .get_account(account_id)
        .await?
        .ok_or_else(|| StoreError::RowNotFound(format!("account {}", account_id)))?;
    let entries_total = store.sum_entries(account_id).await?;

    let audit = BalanceAudit {
        account_id,
        stored_balance: account.balance,
        entries_total,
        is_consistent: account.balance == entries_total,
    };

    if !audit.is_consistent {
        warn!(
            account_id = %account_id,
            stored = %audit.stored_balance,
            entries = %audit.entries_total,
            "Balance does not match entries"
        );
    }

    Ok(audit)
}
