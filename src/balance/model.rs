//! Inputs and outputs of the balance calculations.

use serde::{Deserialize, Serialize};

/// Budget bucket holding assigned money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Envelope id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Money currently assigned to the envelope.
    #[serde(default)]
    pub current_balance: f64,
}

impl Envelope {
    /// Envelope with an empty name.
    pub fn new(id: impl Into<String>, current_balance: f64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            current_balance,
        }
    }
}

/// Savings goal; its saved amount counts toward the virtual balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsGoal {
    /// Goal id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Amount saved so far.
    #[serde(default)]
    pub current_amount: f64,
}

impl SavingsGoal {
    /// Goal with an empty name.
    pub fn new(id: impl Into<String>, current_amount: f64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            current_amount,
        }
    }
}

/// Transaction category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money in.
    Income,
    /// Money out.
    Expense,
    /// Movement between envelopes; does not change the actual balance.
    Transfer,
}

/// Ledger entry. `amount` is signed: income positive, expenses negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction id.
    pub id: String,
    /// Signed amount.
    pub amount: f64,
    /// Category.
    #[serde(rename = "type")]
    pub kind: TransactionKind,
}

impl Transaction {
    /// Builds a transaction.
    pub fn new(id: impl Into<String>, amount: f64, kind: TransactionKind) -> Self {
        Self {
            id: id.into(),
            amount,
            kind,
        }
    }
}

/// Derived budget totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    /// Money actually in the bank.
    pub actual_balance: f64,
    /// Sum of envelope and savings-goal balances.
    pub virtual_balance: f64,
    /// Money not yet assigned to any envelope.
    pub unassigned_cash: f64,
    /// True when `actual_balance` came from a user override.
    pub is_actual_balance_manual: bool,
}

/// Incoming paycheck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paycheck {
    /// Paycheck amount.
    pub amount: f64,
    /// Who paid it, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_name: Option<String>,
}

impl Paycheck {
    /// Paycheck with no payer name.
    pub fn new(amount: f64) -> Self {
        Self {
            amount,
            payer_name: None,
        }
    }
}

/// Money assigned to one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Target envelope.
    pub envelope_id: String,
    /// Amount assigned.
    pub amount: f64,
}

impl Allocation {
    /// Builds an allocation.
    pub fn new(envelope_id: impl Into<String>, amount: f64) -> Self {
        Self {
            envelope_id: envelope_id.into(),
            amount,
        }
    }
}

/// Balance-affecting mutation applied incrementally by
/// [`crate::balance::reconcile()`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BalanceOperation {
    /// A paycheck arrived, optionally split across envelopes right away.
    Paycheck {
        /// The paycheck.
        paycheck: Paycheck,
        /// Immediate allocations out of it.
        allocations: Vec<Allocation>,
    },
    /// Unassigned cash was distributed to envelopes.
    Distribution {
        /// Distribution targets.
        allocations: Vec<Allocation>,
    },
}

pub(crate) fn total_allocated(allocations: &[Allocation]) -> f64 {
    allocations.iter().map(|a| a.amount).sum()
}
