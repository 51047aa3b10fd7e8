//! Invariant checks over a snapshot.

use std::fmt;

use serde::Serialize;

use crate::config::BalanceConfig;

use super::model::BalanceSnapshot;

/// Machine-readable issue code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    /// `actual` differs from `virtual + unassigned` by more than epsilon.
    BalanceMismatch,
    /// Unassigned cash is below the warning threshold.
    LargeNegativeUnassigned,
    /// A component is NaN or infinite.
    NonFiniteBalance,
}

impl IssueCode {
    /// Stable code string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BalanceMismatch => "BALANCE_MISMATCH",
            Self::LargeNegativeUnassigned => "LARGE_NEGATIVE_UNASSIGNED",
            Self::NonFiniteBalance => "NON_FINITE_BALANCE",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceIssue {
    /// Issue code.
    pub code: IssueCode,
    /// Human-readable description.
    pub message: String,
    /// Absolute discrepancy, for mismatches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difference: Option<f64>,
}

impl fmt::Display for BalanceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Outcome of [`validate_balances`]. Valid exactly when `errors` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceValidation {
    /// No hard errors.
    pub is_valid: bool,
    /// Soft findings.
    pub warnings: Vec<BalanceIssue>,
    /// Hard findings.
    pub errors: Vec<BalanceIssue>,
}

impl BalanceValidation {
    /// First error with `code`, if any.
    pub fn error(&self, code: IssueCode) -> Option<&BalanceIssue> {
        self.errors.iter().find(|issue| issue.code == code)
    }

    /// First warning with `code`, if any.
    pub fn warning(&self, code: IssueCode) -> Option<&BalanceIssue> {
        self.warnings.iter().find(|issue| issue.code == code)
    }
}

/// Validates with the default tolerances.
pub fn validate_balances(snapshot: &BalanceSnapshot) -> BalanceValidation {
    validate_balances_with(snapshot, &BalanceConfig::default())
}

/// Validates with explicit tolerances.
pub fn validate_balances_with(snapshot: &BalanceSnapshot, config: &BalanceConfig) -> BalanceValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let components = [
        ("actual_balance", snapshot.actual_balance),
        ("virtual_balance", snapshot.virtual_balance),
        ("unassigned_cash", snapshot.unassigned_cash),
    ];
    let non_finite: Vec<&str> = components
        .iter()
        .filter(|(_, value)| !value.is_finite())
        .map(|(name, _)| *name)
        .collect();

    if !non_finite.is_empty() {
        errors.push(BalanceIssue {
            code: IssueCode::NonFiniteBalance,
            message: format!("non-finite balance components: {}", non_finite.join(", ")),
            difference: None,
        });
        return BalanceValidation {
            is_valid: false,
            warnings,
            errors,
        };
    }

    let expected = snapshot.virtual_balance + snapshot.unassigned_cash;
    let difference = (snapshot.actual_balance - expected).abs();
    if difference > config.epsilon {
        errors.push(BalanceIssue {
            code: IssueCode::BalanceMismatch,
            message: format!(
                "actual balance {:.2} does not equal virtual balance {:.2} plus unassigned cash {:.2}",
                snapshot.actual_balance, snapshot.virtual_balance, snapshot.unassigned_cash
            ),
            difference: Some(difference),
        });
    }

    if snapshot.unassigned_cash < config.large_negative_threshold {
        warnings.push(BalanceIssue {
            code: IssueCode::LargeNegativeUnassigned,
            message: format!(
                "unassigned cash is {:.2}; more has been assigned than is available",
                snapshot.unassigned_cash
            ),
            difference: None,
        });
    }

    BalanceValidation {
        is_valid: errors.is_empty(),
        warnings,
        errors,
    }
}
