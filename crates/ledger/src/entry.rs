//! Ledger entries and their status machine
//!
//! ```text
//! pending -> processing -> completed -> reversed
//!    |           |-> failed -> (retry) pending
//!    \-----------\-> cancelled
//! ```
//!
//! Amounts and balance snapshots never change once an entry is completed.
//! A reversal is a new compensating entry linked both ways.

use cashledger_core::{BalanceChange, CoreError, CoreResult};
use cashledger_risk::{RiskScore, RiskScorer};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Default cap on `retry()` calls per entry
pub const MAX_RETRIES: u32 = 3;

/// Tag carried by entries appended to repair a reconciliation divergence
pub const RECONCILIATION_REPAIR: &str = "reconciliation_repair";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    /// Cashback parked in the pending pool. Stays `pending` and is closed as
    /// `cancelled` once the cashback is credited or voided.
    CashbackEarned,
    CashbackCredited,
    AdRevenue,
    Withdrawal,
    Deposit,
    Refund,
    Penalty,
    Bonus,
    Adjustment,
}

impl EntryType {
    /// Everything except withdrawals and pool entries settles the moment it is recorded
    pub fn is_instantaneous(&self) -> bool {
        !matches!(self, EntryType::Withdrawal | EntryType::CashbackEarned)
    }

    /// Types scored by the risk scorer at creation time
    pub fn is_risk_scored(&self) -> bool {
        matches!(self, EntryType::Withdrawal | EntryType::Deposit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Reversed,
}

impl EntryStatus {
    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending | Processing, Cancelled)
                | (Processing, Completed | Failed)
                | (Failed, Pending)
                | (Completed, Reversed)
        )
    }

    /// Completed at some point, so its balance effect stands
    pub fn has_settled(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Reversed)
    }
}

/// One balance-affecting event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub account_id: String,
    pub entry_type: EntryType,
    /// Signed: credits positive, debits negative
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: EntryStatus,
    pub related_order_id: Option<String>,
    pub related_ad_id: Option<String>,
    pub risk_score: RiskScore,
    pub fraud_flags: BTreeSet<String>,
    pub retry_count: u32,
    pub description: Option<String>,
    pub failure_reason: Option<String>,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub original_entry_id: Option<String>,
    pub reversal_entry_id: Option<String>,
    /// Producer-supplied key, unique across the log
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Record an event against the snapshot taken by the account mutation.
    ///
    /// Instantaneous types start `completed`; withdrawals and cashback-earned
    /// entries start `pending` with a flat snapshot.
    pub fn record(
        account_id: &str,
        entry_type: EntryType,
        amount: Decimal,
        change: BalanceChange,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if entry_type.is_instantaneous() {
            EntryStatus::Completed
        } else {
            EntryStatus::Pending
        };
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            entry_type,
            amount,
            balance_before: change.before,
            balance_after: change.after,
            status,
            related_order_id: None,
            related_ad_id: None,
            risk_score: RiskScore::default(),
            fraud_flags: BTreeSet::new(),
            retry_count: 0,
            description: None,
            failure_reason: None,
            processed_by: None,
            processed_at: if status == EntryStatus::Completed {
                Some(now)
            } else {
                None
            },
            original_entry_id: None,
            reversal_entry_id: None,
            idempotency_key: None,
            created_at: now,
        }
    }

    // === Builders ===

    pub fn with_order(mut self, order_id: &str) -> Self {
        self.related_order_id = Some(order_id.to_string());
        self
    }

    pub fn with_ad(mut self, ad_id: &str) -> Self {
        self.related_ad_id = Some(ad_id.to_string());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub fn with_processed_by(mut self, by: &str) -> Self {
        self.processed_by = Some(by.to_string());
        self
    }

    /// Attach a tag without touching the risk score
    pub fn with_flag(mut self, tag: &str) -> Self {
        self.fraud_flags.insert(tag.to_string());
        self
    }

    /// Run the risk scorer if this entry type is scored
    pub fn scored(mut self, scorer: &RiskScorer) -> Self {
        if self.entry_type.is_risk_scored() {
            self.risk_score = scorer.score(self.amount, self.created_at);
        }
        self
    }

    // === Queries ===

    pub fn is_reversal(&self) -> bool {
        self.original_entry_id.is_some()
    }

    /// `balance_after - balance_before == amount`, required of every entry
    /// that is or becomes `completed`
    pub fn check_snapshot(&self) -> CoreResult<()> {
        if self.balance_after - self.balance_before != self.amount {
            return Err(CoreError::SnapshotMismatch {
                entry_id: self.id.clone(),
                before: self.balance_before,
                after: self.balance_after,
                amount: self.amount,
            });
        }
        Ok(())
    }

    // === Status machine ===

    fn transition(&mut self, next: EntryStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::transition("ledger entry", self.status, next));
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_processing(&mut self, by: &str) -> CoreResult<()> {
        self.transition(EntryStatus::Processing)?;
        self.processed_by = Some(by.to_string());
        Ok(())
    }

    /// Re-take the balance snapshot for an entry whose mutation happens late
    /// (a withdrawal is debited only at completion)
    pub fn restamp(&mut self, change: BalanceChange) -> CoreResult<()> {
        if self.status.has_settled() {
            return Err(CoreError::transition(
                "ledger entry",
                self.status,
                "restamped",
            ));
        }
        self.balance_before = change.before;
        self.balance_after = change.after;
        Ok(())
    }

    /// Completing an already completed entry is a no-op and returns `false`
    pub fn mark_completed(&mut self, by: &str, now: DateTime<Utc>) -> CoreResult<bool> {
        if self.status == EntryStatus::Completed {
            return Ok(false);
        }
        if !self.status.can_transition_to(EntryStatus::Completed) {
            return Err(CoreError::transition(
                "ledger entry",
                self.status,
                EntryStatus::Completed,
            ));
        }
        self.check_snapshot()?;
        self.status = EntryStatus::Completed;
        self.processed_by = Some(by.to_string());
        self.processed_at = Some(now);
        Ok(true)
    }

    pub fn mark_failed(&mut self, reason: &str, by: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(EntryStatus::Failed)?;
        self.failure_reason = Some(reason.to_string());
        self.processed_by = Some(by.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str, by: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(EntryStatus::Cancelled)?;
        self.failure_reason = Some(reason.to_string());
        self.processed_by = Some(by.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    /// Send a failed entry back to `pending`, at most `max_retries` times
    pub fn retry(&mut self, max_retries: u32) -> CoreResult<()> {
        if self.status != EntryStatus::Failed {
            return Err(CoreError::transition(
                "ledger entry",
                self.status,
                EntryStatus::Pending,
            ));
        }
        if self.retry_count >= max_retries {
            return Err(CoreError::RetryLimitExceeded {
                attempts: self.retry_count,
                max: max_retries,
            });
        }
        self.retry_count += 1;
        self.transition(EntryStatus::Pending)
    }

    /// Build the compensating entry for this one and mark it reversed.
    ///
    /// `change` is the snapshot of the opposite account mutation, already
    /// applied by the caller in the same unit of work.
    pub fn reverse(
        &mut self,
        change: BalanceChange,
        reason: &str,
        by: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<LedgerEntry> {
        if self.is_reversal() {
            return Err(CoreError::transition(
                "ledger entry",
                "reversal",
                EntryStatus::Reversed,
            ));
        }
        if !self.status.can_transition_to(EntryStatus::Reversed) {
            return Err(CoreError::transition(
                "ledger entry",
                self.status,
                EntryStatus::Reversed,
            ));
        }

        let mut reversal = LedgerEntry::record(
            &self.account_id,
            self.entry_type,
            -self.amount,
            change,
            now,
        )
        .with_description(format!("Reversal of {}: {}", self.id, reason))
        .with_processed_by(by);
        reversal.status = EntryStatus::Completed;
        reversal.processed_at = Some(now);
        reversal.related_order_id = self.related_order_id.clone();
        reversal.related_ad_id = self.related_ad_id.clone();
        reversal.original_entry_id = Some(self.id.clone());
        reversal.check_snapshot()?;

        self.status = EntryStatus::Reversed;
        self.reversal_entry_id = Some(reversal.id.clone());
        self.processed_by = Some(by.to_string());
        self.processed_at = Some(now);
        Ok(reversal)
    }

    /// Idempotent set-insert; a new tag raises the risk score by `increment`
    pub fn add_fraud_flag(&mut self, tag: &str, increment: u8) -> bool {
        let inserted = self.fraud_flags.insert(tag.to_string());
        if inserted {
            self.risk_score = self.risk_score.raised(increment);
        }
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn change(before: Decimal, after: Decimal) -> BalanceChange {
        BalanceChange { before, after }
    }

    fn pending_withdrawal() -> LedgerEntry {
        LedgerEntry::record(
            "acc-1",
            EntryType::Withdrawal,
            dec!(-200),
            change(dec!(500), dec!(500)),
            Utc::now(),
        )
    }

    #[test]
    fn test_initial_status_by_type() {
        let credit = LedgerEntry::record(
            "acc-1",
            EntryType::AdRevenue,
            dec!(5),
            change(dec!(0), dec!(5)),
            Utc::now(),
        );
        assert_eq!(credit.status, EntryStatus::Completed);
        assert!(credit.processed_at.is_some());
        assert!(credit.check_snapshot().is_ok());

        let withdrawal = pending_withdrawal();
        assert_eq!(withdrawal.status, EntryStatus::Pending);
        assert!(withdrawal.processed_at.is_none());
    }

    #[test]
    fn test_type_strings() {
        assert_eq!(EntryType::CashbackEarned.to_string(), "cashback-earned");
        assert_eq!(EntryType::from_str("ad-revenue").unwrap(), EntryType::AdRevenue);
        assert_eq!(EntryStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_withdrawal_lifecycle() {
        let mut entry = pending_withdrawal();
        entry.mark_processing("admin-1").unwrap();

        // snapshot still flat, completion must refuse
        assert!(matches!(
            entry.mark_completed("admin-1", Utc::now()),
            Err(CoreError::SnapshotMismatch { .. })
        ));

        entry.restamp(change(dec!(500), dec!(300))).unwrap();
        assert!(entry.mark_completed("admin-1", Utc::now()).unwrap());
        assert_eq!(entry.status, EntryStatus::Completed);

        // replay is a no-op
        assert!(!entry.mark_completed("admin-1", Utc::now()).unwrap());
        assert!(entry.restamp(change(dec!(0), dec!(0))).is_err());
    }

    #[test]
    fn test_cannot_skip_processing() {
        let mut entry = pending_withdrawal();
        entry.restamp(change(dec!(500), dec!(300))).unwrap();
        assert!(entry.mark_completed("admin-1", Utc::now()).is_err());
        assert!(entry.mark_failed("x", "admin-1", Utc::now()).is_err());
    }

    #[test]
    fn test_cancel_from_pending() {
        let mut entry = pending_withdrawal();
        entry.cancel("rejected by review", "admin-1", Utc::now()).unwrap();
        assert_eq!(entry.status, EntryStatus::Cancelled);
        assert!(entry.mark_processing("admin-1").is_err());
    }

    #[test]
    fn test_retry_limit() {
        let mut entry = pending_withdrawal();
        for _ in 0..MAX_RETRIES {
            entry.mark_processing("worker").unwrap();
            entry.mark_failed("gateway timeout", "worker", Utc::now()).unwrap();
            entry.retry(MAX_RETRIES).unwrap();
        }
        assert_eq!(entry.retry_count, 3);

        entry.mark_processing("worker").unwrap();
        entry.mark_failed("gateway timeout", "worker", Utc::now()).unwrap();
        assert_eq!(
            entry.retry(MAX_RETRIES),
            Err(CoreError::RetryLimitExceeded {
                attempts: 3,
                max: 3
            })
        );
        assert_eq!(entry.status, EntryStatus::Failed);
    }

    #[test]
    fn test_retry_requires_failed() {
        let mut entry = pending_withdrawal();
        assert!(matches!(
            entry.retry(MAX_RETRIES),
            Err(CoreError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_reverse_appends_linked_entry() {
        let mut original = LedgerEntry::record(
            "acc-1",
            EntryType::Bonus,
            dec!(50),
            change(dec!(100), dec!(150)),
            Utc::now(),
        );
        let reversal = original
            .reverse(change(dec!(150), dec!(100)), "issued in error", "admin-1", Utc::now())
            .unwrap();

        assert_eq!(reversal.amount, dec!(-50));
        assert_eq!(reversal.status, EntryStatus::Completed);
        assert_eq!(reversal.original_entry_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(original.reversal_entry_id.as_deref(), Some(reversal.id.as_str()));
        assert_eq!(original.status, EntryStatus::Reversed);
        // history untouched
        assert_eq!(original.amount, dec!(50));
        assert_eq!(original.balance_after, dec!(150));
    }

    #[test]
    fn test_reverse_guards() {
        let mut original = LedgerEntry::record(
            "acc-1",
            EntryType::Bonus,
            dec!(50),
            change(dec!(100), dec!(150)),
            Utc::now(),
        );
        // wrong snapshot for the compensating mutation
        assert!(original
            .reverse(change(dec!(150), dec!(150)), "x", "admin-1", Utc::now())
            .is_err());
        assert_eq!(original.status, EntryStatus::Completed);

        let mut reversal = original
            .reverse(change(dec!(150), dec!(100)), "x", "admin-1", Utc::now())
            .unwrap();
        assert!(original
            .reverse(change(dec!(100), dec!(50)), "x", "admin-1", Utc::now())
            .is_err());
        assert!(reversal
            .reverse(change(dec!(100), dec!(150)), "x", "admin-1", Utc::now())
            .is_err());

        let mut pending = pending_withdrawal();
        assert!(pending
            .reverse(change(dec!(500), dec!(700)), "x", "admin-1", Utc::now())
            .is_err());
    }

    #[test]
    fn test_pool_entry_never_completes() {
        let mut earned = LedgerEntry::record(
            "acc-1",
            EntryType::CashbackEarned,
            dec!(150),
            change(dec!(40), dec!(40)),
            Utc::now(),
        );
        assert_eq!(earned.status, EntryStatus::Pending);
        assert!(earned.processed_at.is_none());
        // the flat snapshot cannot pass as a completed entry
        assert!(matches!(
            earned.check_snapshot(),
            Err(CoreError::SnapshotMismatch { .. })
        ));
        assert!(earned
            .reverse(change(dec!(40), dec!(40)), "x", "admin-1", Utc::now())
            .is_err());

        earned
            .cancel("settled by credited entry", "settlement", Utc::now())
            .unwrap();
        assert_eq!(earned.status, EntryStatus::Cancelled);
        assert!(!earned.status.has_settled());
    }

    #[test]
    fn test_fraud_flags() {
        let mut entry = pending_withdrawal();
        entry.risk_score = RiskScore::new(55);

        assert!(entry.add_fraud_flag("velocity", 20));
        assert_eq!(entry.risk_score.value(), 75);
        assert!(!entry.add_fraud_flag("velocity", 20));
        assert_eq!(entry.risk_score.value(), 75);

        entry.add_fraud_flag("device_mismatch", 20);
        entry.add_fraud_flag("vpn", 20);
        assert_eq!(entry.risk_score.value(), 100);
        assert_eq!(entry.fraud_flags.len(), 3);
    }

    #[test]
    fn test_scoring_only_for_scored_types() {
        let scorer = RiskScorer::default();
        let saturday_night = Utc.with_ymd_and_hms(2026, 10, 17, 23, 0, 0).unwrap();

        let deposit = LedgerEntry::record(
            "acc-1",
            EntryType::Deposit,
            dec!(60000),
            change(dec!(0), dec!(60000)),
            saturday_night,
        )
        .scored(&scorer);
        assert_eq!(deposit.risk_score.value(), 55);

        let bonus = LedgerEntry::record(
            "acc-1",
            EntryType::Bonus,
            dec!(60000),
            change(dec!(0), dec!(60000)),
            saturday_night,
        )
        .scored(&scorer);
        assert_eq!(bonus.risk_score.value(), 0);
    }
}
