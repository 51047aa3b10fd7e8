//! Snapshot derivation.

use super::model::{
    total_allocated, Allocation, BalanceSnapshot, Envelope, Paycheck, SavingsGoal, Transaction,
    TransactionKind,
};

/// Derives a snapshot from full collections.
///
/// With `manual_actual_balance` set, it is used verbatim; otherwise the actual
/// balance is the sum of every non-transfer transaction amount.
pub fn calculate_balances(
    envelopes: &[Envelope],
    transactions: &[Transaction],
    savings_goals: &[SavingsGoal],
    manual_actual_balance: Option<f64>,
) -> BalanceSnapshot {
    let envelope_total: f64 = envelopes.iter().map(|e| e.current_balance).sum();
    let goal_total: f64 = savings_goals.iter().map(|g| g.current_amount).sum();
    let virtual_balance = envelope_total + goal_total;

    let actual_balance = manual_actual_balance.unwrap_or_else(|| {
        transactions
            .iter()
            .filter(|t| t.kind != TransactionKind::Transfer)
            .map(|t| t.amount)
            .sum()
    });

    BalanceSnapshot {
        actual_balance,
        virtual_balance,
        unassigned_cash: actual_balance - virtual_balance,
        is_actual_balance_manual: manual_actual_balance.is_some(),
    }
}

/// Applies a paycheck: the full amount lands in the bank, the allocated part
/// in envelopes, and the rest in unassigned cash.
pub fn calculate_paycheck_balances(
    current: &BalanceSnapshot,
    paycheck: &Paycheck,
    allocations: &[Allocation],
) -> BalanceSnapshot {
    let allocated = total_allocated(allocations);
    BalanceSnapshot {
        actual_balance: current.actual_balance + paycheck.amount,
        virtual_balance: current.virtual_balance + allocated,
        unassigned_cash: current.unassigned_cash + paycheck.amount - allocated,
        is_actual_balance_manual: current.is_actual_balance_manual,
    }
}

/// Moves unassigned cash into envelopes; the actual balance is unchanged.
pub fn calculate_distribution_balances(
    current: &BalanceSnapshot,
    allocations: &[Allocation],
) -> BalanceSnapshot {
    let distributed = total_allocated(allocations);
    BalanceSnapshot {
        actual_balance: current.actual_balance,
        virtual_balance: current.virtual_balance + distributed,
        unassigned_cash: current.unassigned_cash - distributed,
        is_actual_balance_manual: current.is_actual_balance_manual,
    }
}
