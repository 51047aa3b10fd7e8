//! Balance derivation and invariant checks.
//!
//! Everything here is pure: inputs in, snapshot or report out. The invariant
//! is `actual_balance ≈ virtual_balance + unassigned_cash`, where the virtual
//! balance is the sum of envelope and savings-goal balances.

pub mod calc;
pub mod model;
pub mod reconcile;
pub mod validate;

pub use calc::{calculate_balances, calculate_distribution_balances, calculate_paycheck_balances};
pub use model::{
    Allocation, BalanceOperation, BalanceSnapshot, Envelope, Paycheck, SavingsGoal, Transaction,
    TransactionKind,
};
pub use reconcile::{reconcile, reconcile_with, ReconcileError};
pub use validate::{
    validate_balances, validate_balances_with, BalanceIssue, BalanceValidation, IssueCode,
};
