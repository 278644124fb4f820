//! Withdrawal request and its review workflow
//!
//! ```text
//! pending -> approved -> completed
//!    |          \-> failed -> (retry) approved
//!    |-> rejected
//!    \-> cancelled (holder cancel or stale expiry)
//! ```
//!
//! The request is tied 1:1 to a `withdrawal` ledger entry. Funds stay reserved
//! on the account from request until completion, rejection, cancellation or an
//! explicit release after a failed payout.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    /// Approved by review, payout in progress
    Approved,
    Rejected,
    Cancelled,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    /// Whether the request still holds a reservation under normal flow
    pub fn holds_reservation(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Pending | WithdrawalStatus::Approved | WithdrawalStatus::Failed
        )
    }
}

/// Payout rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalMethod {
    BankTransfer,
    Upi,
    Paypal,
    GiftCard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: String,
    pub account_id: String,
    /// The `withdrawal` ledger entry this request drives
    pub entry_id: String,
    pub amount: Decimal,
    pub method: WithdrawalMethod,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub external_transaction_id: Option<String>,
    pub reviewed_by: Option<String>,
    pub review_reason: Option<String>,
    /// Set once the reservation of a failed request has been handed back
    pub reservation_released: bool,
}

impl WithdrawalRequest {
    pub fn new(
        account_id: &str,
        entry_id: &str,
        amount: Decimal,
        method: WithdrawalMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            entry_id: entry_id.to_string(),
            amount,
            method,
            status: WithdrawalStatus::Pending,
            requested_at: now,
            processed_at: None,
            external_transaction_id: None,
            reviewed_by: None,
            review_reason: None,
            reservation_released: false,
        }
    }

    fn expect_status(&self, expected: WithdrawalStatus, to: WithdrawalStatus) -> CoreResult<()> {
        if self.status != expected {
            return Err(CoreError::transition("withdrawal", self.status, to));
        }
        Ok(())
    }

    pub fn approve(&mut self, reviewer: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.expect_status(WithdrawalStatus::Pending, WithdrawalStatus::Approved)?;
        self.status = WithdrawalStatus::Approved;
        self.reviewed_by = Some(reviewer.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    pub fn reject(&mut self, reviewer: &str, reason: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.expect_status(WithdrawalStatus::Pending, WithdrawalStatus::Rejected)?;
        self.status = WithdrawalStatus::Rejected;
        self.reviewed_by = Some(reviewer.to_string());
        self.review_reason = Some(reason.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    /// Holder cancellation, only while still pending
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.expect_status(WithdrawalStatus::Pending, WithdrawalStatus::Cancelled)?;
        self.status = WithdrawalStatus::Cancelled;
        self.review_reason = Some(reason.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    /// Record a confirmed payout.
    ///
    /// Returns `false` when the request was already completed, in which case
    /// nothing changes and the caller must not debit again.
    pub fn complete(&mut self, external_tx_id: &str, now: DateTime<Utc>) -> CoreResult<bool> {
        if self.status == WithdrawalStatus::Completed {
            return Ok(false);
        }
        self.expect_status(WithdrawalStatus::Approved, WithdrawalStatus::Completed)?;
        self.status = WithdrawalStatus::Completed;
        self.external_transaction_id = Some(external_tx_id.to_string());
        self.processed_at = Some(now);
        Ok(true)
    }

    /// Payout failed; the reservation stays until released or retried
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.expect_status(WithdrawalStatus::Approved, WithdrawalStatus::Failed)?;
        self.status = WithdrawalStatus::Failed;
        self.review_reason = Some(reason.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    /// Send a failed payout back to processing
    pub fn retry(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.expect_status(WithdrawalStatus::Failed, WithdrawalStatus::Approved)?;
        if self.reservation_released {
            return Err(CoreError::transition(
                "withdrawal",
                "failed (reservation released)",
                WithdrawalStatus::Approved,
            ));
        }
        self.status = WithdrawalStatus::Approved;
        self.processed_at = Some(now);
        Ok(())
    }

    /// Mark the reservation of a failed request as handed back, exactly once
    pub fn release_failed(&mut self, reviewer: &str) -> CoreResult<()> {
        if self.status != WithdrawalStatus::Failed || self.reservation_released {
            return Err(CoreError::transition(
                "withdrawal",
                self.status,
                "reservation released",
            ));
        }
        self.reservation_released = true;
        self.reviewed_by = Some(reviewer.to_string());
        Ok(())
    }

    /// Pending for longer than `max_age` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.status == WithdrawalStatus::Pending && now - self.requested_at > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn request() -> WithdrawalRequest {
        WithdrawalRequest::new(
            "acc-1",
            "entry-1",
            dec!(200),
            WithdrawalMethod::Upi,
            Utc::now(),
        )
    }

    #[test]
    fn test_happy_path() {
        let now = Utc::now();
        let mut req = request();
        req.approve("admin-1", now).unwrap();
        assert!(req.complete("TXN-42", now).unwrap());
        assert_eq!(req.status, WithdrawalStatus::Completed);
        assert_eq!(req.external_transaction_id.as_deref(), Some("TXN-42"));
    }

    #[test]
    fn test_complete_is_idempotent() {
        let now = Utc::now();
        let mut req = request();
        req.approve("admin-1", now).unwrap();
        assert!(req.complete("TXN-42", now).unwrap());
        assert!(!req.complete("TXN-43", now).unwrap());
        assert_eq!(req.external_transaction_id.as_deref(), Some("TXN-42"));
    }

    #[test]
    fn test_cannot_complete_pending() {
        let mut req = request();
        assert!(matches!(
            req.complete("TXN", Utc::now()),
            Err(CoreError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_only_while_pending() {
        let now = Utc::now();
        let mut req = request();
        req.approve("admin-1", now).unwrap();
        assert!(req.cancel("changed my mind", now).is_err());

        let mut req = request();
        req.cancel("changed my mind", now).unwrap();
        assert_eq!(req.status, WithdrawalStatus::Cancelled);
        assert!(!req.status.holds_reservation());
    }

    #[test]
    fn test_reject_records_reviewer() {
        let mut req = request();
        req.reject("admin-2", "bank details mismatch", Utc::now()).unwrap();
        assert_eq!(req.reviewed_by.as_deref(), Some("admin-2"));
        assert_eq!(req.review_reason.as_deref(), Some("bank details mismatch"));
        assert!(req.approve("admin-1", Utc::now()).is_err());
    }

    #[test]
    fn test_fail_retry_release() {
        let now = Utc::now();
        let mut req = request();
        req.approve("admin-1", now).unwrap();
        req.fail("gateway timeout", now).unwrap();
        assert!(req.status.holds_reservation());

        req.retry(now).unwrap();
        assert_eq!(req.status, WithdrawalStatus::Approved);
        req.fail("gateway timeout", now).unwrap();

        req.release_failed("admin-1").unwrap();
        assert!(req.release_failed("admin-1").is_err());
        assert!(req.retry(now).is_err());
    }

    #[test]
    fn test_staleness() {
        let mut req = request();
        req.requested_at = Utc::now() - Duration::hours(80);
        assert!(req.is_stale(Utc::now(), Duration::hours(72)));
        assert!(!req.is_stale(Utc::now(), Duration::hours(96)));
    }

    #[test]
    fn test_method_round_trip_strings() {
        assert_eq!(WithdrawalMethod::BankTransfer.to_string(), "bank-transfer");
        assert_eq!(
            WithdrawalMethod::from_str("gift-card").unwrap(),
            WithdrawalMethod::GiftCard
        );
    }
}
