//! Ordered balance locking.
//!
//! Applying a balance delta takes the account's row lock until the unit
//! ends. Two transfers moving money in opposite directions between the same
//! accounts would each hold one lock and wait for the other if they touched
//! the debit side first. Every call site therefore applies the deltas of a
//! transfer in ascending account id order, whichever side is debited.

use rust_decimal::Decimal;
use tallybank_common::{AccountId, Result};
use tallybank_ledger::LedgerUnit;
use tracing::trace;

/// A signed delta to apply to one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancePosting {
    pub account_id: AccountId,
    pub delta: Decimal,
}

impl BalancePosting {
    pub fn new(account_id: AccountId, delta: Decimal) -> Self {
        Self { account_id, delta }
    }
}

/// Order two postings so the lower account id is touched first.
pub fn ordered_postings(a: BalancePosting, b: BalancePosting) -> [BalancePosting; 2] {
    if a.account_id <= b.account_id {
        [a, b]
    } else {
        [b, a]
    }
}

/// A posting together with the balance it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedPosting {
    pub posting: BalancePosting,
    pub new_balance: Decimal,
}

/// Apply both postings inside `unit` in lock order.
pub async fn apply_in_order(
    unit: &mut dyn LedgerUnit,
    a: BalancePosting,
    b: BalancePosting,
) -> Result<[AppliedPosting; 2]> {
    let [first, second] = ordered_postings(a, b);

    trace!(account_id = %first.account_id, delta = %first.delta, "Applying first posting");
    let first_balance = unit.add_account_balance(first.account_id, first.delta).await?;

    trace!(account_id = %second.account_id, delta = %second.delta, "Applying second posting");
    let second_balance = unit.add_account_balance(second.account_id, second.delta).await?;

    Ok([
        AppliedPosting {
            posting: first,
            new_balance: first_balance,
        },
        AppliedPosting {
            posting: second,
            new_balance: second_balance,
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_lower_id_first_regardless_of_direction() {
        let debit = BalancePosting::new(AccountId::new(7), dec!(-10));
        let credit = BalancePosting::new(AccountId::new(3), dec!(10));

        let [first, second] = ordered_postings(debit, credit);
        assert_eq!(first.account_id, AccountId::new(3));
        assert_eq!(second.account_id, AccountId::new(7));

        let [first, _] = ordered_postings(credit, debit);
        assert_eq!(first.account_id, AccountId::new(3));
    }

    proptest! {
        #[test]
        fn prop_order_is_symmetric(a in 1i64..10_000, b in 1i64..10_000, x in -1000i64..1000, y in -1000i64..1000) {
            let pa = BalancePosting::new(AccountId::new(a), Decimal::from(x));
            let pb = BalancePosting::new(AccountId::new(b), Decimal::from(y));

            let forward = ordered_postings(pa, pb);
            let backward = ordered_postings(pb, pa);

            prop_assert!(forward[0].account_id <= forward[1].account_id);
            prop_assert_eq!(forward[0].account_id, backward[0].account_id);
            prop_assert_eq!(forward[1].account_id, backward[1].account_id);
        }
    }
}
