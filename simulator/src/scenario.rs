//! Simulation scenarios.
//!
//! Customers are addressed by their index in the order they were opened.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallybank_common::StoreError;
use tallybank_ledger::FaultPoint;

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Customers to open before the first step.
    pub customers: usize,
    /// Opening balance of every customer.
    pub opening_balance: Decimal,
    /// Open customers across every supported currency.
    #[serde(default)]
    pub multi_currency: bool,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Pause.
    Wait { millis: u64 },
    /// One transfer between two customers, in the sender's currency unless
    /// the receiver holds another one.
    Transfer {
        from: usize,
        to: usize,
        amount: Decimal,
        /// Error code the transfer must fail with, or `None` for success.
        #[serde(default)]
        expect_error: Option<String>,
    },
    /// `count` identical transfers submitted at once.
    Burst {
        from: usize,
        to: usize,
        amount: Decimal,
        count: usize,
    },
    /// Move the simulated clock forward.
    AdvanceClock { minutes: i64 },
    /// Refresh every exchange rate, restarting their expiry windows.
    RefreshRates,
    /// Fail the next store operation at `fault`.
    InjectFault { fault: FaultType, transient: bool },
    /// Check a condition.
    Assert { condition: AssertCondition },
}

/// Store operations a fault can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultType {
    CreateTransfer,
    CreateEntry,
    AddBalance,
    Commit,
}

impl FaultType {
    pub fn point(self) -> FaultPoint {
        match self {
            FaultType::CreateTransfer => FaultPoint::CreateTransfer,
            FaultType::CreateEntry => FaultPoint::CreateEntry,
            FaultType::AddBalance => FaultPoint::AddBalance,
            FaultType::Commit => FaultPoint::Commit,
        }
    }

    /// The store error a fault raises.
    pub fn error(self, transient: bool) -> StoreError {
        let detail = format!("injected fault at {:?}", self);
        if transient {
            StoreError::Conflict(detail)
        } else {
            StoreError::Database(detail)
        }
    }
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// A customer's stored balance.
    BalanceEquals { customer: usize, amount: Decimal },
    /// Number of committed transfers.
    TransferCount { count: usize },
    /// Every balance equals the sum of its entries and matches the
    /// completed transfers.
    LedgerConsistent,
}

impl Scenario {
    /// Load a built-in scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "ping-pong" => Ok(Self::ping_pong()),
            "fan-in" => Ok(Self::fan_in()),
            "cross-currency" => Ok(Self::cross_currency()),
            "failure-recovery" => Ok(Self::failure_recovery()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Load a scenario from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["ping-pong", "fan-in", "cross-currency", "failure-recovery"]
    }

    /// Opposing bursts between two USD customers.
    fn ping_pong() -> Self {
        Self {
            name: "ping-pong".to_string(),
            description: "Opposing concurrent transfers between two accounts".to_string(),
            customers: 2,
            opening_balance: Decimal::from(1_000),
            multi_currency: false,
            steps: vec![
                ScenarioStep::Burst {
                    from: 0,
                    to: 1,
                    amount: Decimal::from(7),
                    count: 20,
                },
                ScenarioStep::Burst {
                    from: 1,
                    to: 0,
                    amount: Decimal::from(3),
                    count: 20,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        customer: 0,
                        amount: Decimal::from(920),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LedgerConsistent,
                },
            ],
        }
    }

    /// Senders bursting more than they hold into one receiver.
    fn fan_in() -> Self {
        let mut steps: Vec<ScenarioStep> = (1..5)
            .map(|from| ScenarioStep::Burst {
                from,
                to: 0,
                amount: Decimal::from(30),
                count: 5,
            })
            .collect();
        steps.push(ScenarioStep::Assert {
            condition: AssertCondition::BalanceEquals {
                customer: 0,
                amount: Decimal::from(460),
            },
        });
        steps.push(ScenarioStep::Assert {
            condition: AssertCondition::LedgerConsistent,
        });

        Self {
            name: "fan-in".to_string(),
            description: "Concurrent transfers into one account; senders cannot overdraw".to_string(),
            customers: 5,
            opening_balance: Decimal::from(100),
            multi_currency: false,
            steps,
        }
    }

    /// Conversions across currencies, then a rejected transfer once rates expire.
    fn cross_currency() -> Self {
        Self {
            name: "cross-currency".to_string(),
            description: "Converted transfers, rate expiry and refresh".to_string(),
            customers: 4,
            opening_balance: Decimal::from(10_000),
            multi_currency: true,
            steps: vec![
                ScenarioStep::Transfer {
                    from: 0,
                    to: 1,
                    amount: Decimal::from(100),
                    expect_error: None,
                },
                ScenarioStep::Transfer {
                    from: 2,
                    to: 3,
                    amount: Decimal::from(50),
                    expect_error: None,
                },
                ScenarioStep::Burst {
                    from: 1,
                    to: 0,
                    amount: Decimal::from(10),
                    count: 10,
                },
                ScenarioStep::AdvanceClock { minutes: 61 },
                ScenarioStep::Transfer {
                    from: 0,
                    to: 2,
                    amount: Decimal::from(10),
                    expect_error: Some("EXCHANGE_RATE_EXPIRED".to_string()),
                },
                ScenarioStep::RefreshRates,
                ScenarioStep::Transfer {
                    from: 0,
                    to: 2,
                    amount: Decimal::from(10),
                    expect_error: None,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::TransferCount { count: 13 },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LedgerConsistent,
                },
            ],
        }
    }

    /// Injected store faults leave no trace; transient ones are retried.
    fn failure_recovery() -> Self {
        Self {
            name: "failure-recovery".to_string(),
            description: "Store faults roll back; retries absorb transient ones".to_string(),
            customers: 2,
            opening_balance: Decimal::from(500),
            multi_currency: false,
            steps: vec![
                ScenarioStep::InjectFault {
                    fault: FaultType::Commit,
                    transient: false,
                },
                ScenarioStep::Transfer {
                    from: 0,
                    to: 1,
                    amount: Decimal::from(100),
                    expect_error: Some("INTERNAL_ERROR".to_string()),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::TransferCount { count: 0 },
                },
                ScenarioStep::InjectFault {
                    fault: FaultType::AddBalance,
                    transient: true,
                },
                ScenarioStep::Transfer {
                    from: 0,
                    to: 1,
                    amount: Decimal::from(100),
                    expect_error: None,
                },
                ScenarioStep::Transfer {
                    from: 1,
                    to: 1,
                    amount: Decimal::from(1),
                    expect_error: Some("SAME_ACCOUNT_TRANSFER".to_string()),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        customer: 1,
                        amount: Decimal::from(600),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LedgerConsistent,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_load() {
        for name in Scenario::builtin_names() {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(&scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("nope").is_err());
    }

    #[test]
    fn test_scenario_json_shape() {
        let json = serde_json::to_string(&Scenario::failure_recovery()).unwrap();
        let back: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(back.steps.len(), Scenario::failure_recovery().steps.len());
        assert!(json.contains("InjectFault"));
    }
}
