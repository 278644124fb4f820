//! Reconciliation of an account against its entry log
//!
//! The sum of signed amounts of every settled (completed, or completed then
//! reversed) entry must equal `balance - opening_balance`. Pending and
//! cancelled entries, pool entries included, never count. Lifetime counters
//! can be recomputed from the same log.

use crate::entry::{EntryType, LedgerEntry, RECONCILIATION_REPAIR};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub account_id: String,
    /// `opening_balance + sum(settled amounts)`
    pub expected_balance: Decimal,
    pub actual_balance: Decimal,
    /// `actual_balance - expected_balance`; zero when the log and the account agree
    pub divergence: Decimal,
    pub entries_counted: usize,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.divergence.is_zero()
    }
}

/// Compare the account balance with what its entry log implies
pub fn reconcile(
    account_id: &str,
    opening_balance: Decimal,
    actual_balance: Decimal,
    entries: &[LedgerEntry],
) -> Reconciliation {
    let settled: Vec<&LedgerEntry> = entries
        .iter()
        .filter(|e| e.account_id == account_id)
        .filter(|e| e.status.has_settled())
        .collect();

    let expected_balance = opening_balance + settled.iter().map(|e| e.amount).sum::<Decimal>();
    Reconciliation {
        account_id: account_id.to_string(),
        expected_balance,
        actual_balance,
        divergence: actual_balance - expected_balance,
        entries_counted: settled.len(),
    }
}

/// Lifetime counters derived from the log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeTotals {
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
    pub total_spent: Decimal,
}

impl LifetimeTotals {
    /// Reversal pairs and reconciliation repairs are corrections, not activity,
    /// and are skipped.
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut totals = Self::default();
        for entry in entries.iter().filter(|e| {
            e.status.has_settled()
                && !e.is_reversal()
                && !e.fraud_flags.contains(RECONCILIATION_REPAIR)
        }) {
            match entry.entry_type {
                EntryType::Withdrawal => totals.total_withdrawn += entry.amount.abs(),
                EntryType::Penalty => totals.total_spent += entry.amount.abs(),
                EntryType::Adjustment if entry.amount < Decimal::ZERO => {
                    totals.total_spent += entry.amount.abs()
                }
                _ => totals.total_earned += entry.amount,
            }
        }
        totals
    }
}
