//! Apply-then-validate for incremental balance updates.

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BalanceConfig;

use super::{
    calc::{calculate_distribution_balances, calculate_paycheck_balances},
    model::{BalanceOperation, BalanceSnapshot},
    validate::{validate_balances_with, BalanceIssue},
};

/// A mutation produced a snapshot that breaks the balance invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    /// Hard validation errors were found.
    #[error("balance invariant violated: {}", .errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    InvariantViolated {
        /// The rejected snapshot.
        snapshot: BalanceSnapshot,
        /// Every hard error.
        errors: Vec<BalanceIssue>,
    },
}

/// Applies `operation` to `prev` and validates with default tolerances.
pub fn reconcile(
    prev: &BalanceSnapshot,
    operation: &BalanceOperation,
) -> Result<BalanceSnapshot, ReconcileError> {
    reconcile_with(prev, operation, &BalanceConfig::default())
}

/// Applies `operation` to `prev` and validates with `config`.
///
/// Warnings are logged and do not fail the call.
pub fn reconcile_with(
    prev: &BalanceSnapshot,
    operation: &BalanceOperation,
    config: &BalanceConfig,
) -> Result<BalanceSnapshot, ReconcileError> {
    let next = match operation {
        BalanceOperation::Paycheck {
            paycheck,
            allocations,
        } => calculate_paycheck_balances(prev, paycheck, allocations),
        BalanceOperation::Distribution { allocations } => {
            calculate_distribution_balances(prev, allocations)
        }
    };

    let validation = validate_balances_with(&next, config);
    for issue in &validation.warnings {
        warn!(code = %issue.code, detail = %issue.message, "balance warning");
    }
    if !validation.is_valid {
        warn!(
            errors = validation.errors.len(),
            actual = next.actual_balance,
            virtual_balance = next.virtual_balance,
            unassigned = next.unassigned_cash,
            "balance validation failed"
        );
        return Err(ReconcileError::InvariantViolated {
            snapshot: next,
            errors: validation.errors,
        });
    }

    debug!(
        actual = next.actual_balance,
        unassigned = next.unassigned_cash,
        "balances reconciled"
    );
    Ok(next)
}
