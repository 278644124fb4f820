//! Order cashback record and the settlement state machine
//!
//! ```text
//! order:    pending -> confirmed -> shipped -> delivered -> returned
//!              \__________\___________\---> cancelled
//!           (purchase tracking may skip forward, e.g. pending -> delivered)
//!
//! cashback: pending -> approved -> credited
//!              \__________\---> rejected
//! ```
//!
//! `credited` requires a delivered order, an approved cashback and
//! `now > return_period_ends`.

use crate::error::{CoreError, CoreResult};
use crate::policy::CashbackPolicy;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Default cooling period after delivery
pub const DEFAULT_RETURN_PERIOD_DAYS: i64 = 30;

/// Order lifecycle as reported by purchase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    /// Position on the fulfilment path; `None` for the void states
    fn stage(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Shipped => Some(2),
            OrderStatus::Delivered => Some(3),
            OrderStatus::Cancelled | OrderStatus::Returned => None,
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending | Confirmed | Shipped, Cancelled) | (Delivered, Returned) => true,
            _ => matches!((self.stage(), next.stage()), (Some(from), Some(to)) if to > from),
        }
    }

    /// Cancelled or returned orders never earn cashback
    pub fn voids_cashback(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Returned)
    }
}

/// Cashback settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CashbackStatus {
    Pending,
    Approved,
    Credited,
    Rejected,
}

impl CashbackStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CashbackStatus::Credited | CashbackStatus::Rejected)
    }
}

/// Cashback owed on one tracked purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCashback {
    pub order_id: String,
    pub account_id: String,
    pub order_amount: Decimal,
    /// Fixed when the order is tracked, never recomputed
    pub cashback_percent: Decimal,
    pub cashback_amount: Decimal,
    pub order_status: OrderStatus,
    pub cashback_status: CashbackStatus,
    pub delivery_date: Option<DateTime<Utc>>,
    pub return_period_ends: Option<DateTime<Utc>>,
    /// `cashback-earned` entry created when the order was tracked
    pub earned_entry_id: Option<String>,
    /// `cashback-credited` entry created at settlement
    pub credited_entry_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderCashback {
    /// Start tracking an order, fixing its cashback rate under `policy`
    pub fn track(
        order_id: &str,
        account_id: &str,
        order_amount: Decimal,
        policy: &CashbackPolicy,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        if order_amount <= Decimal::ZERO {
            return Err(CoreError::InvalidAmount(order_amount));
        }
        let cashback_percent = policy.percent_for(order_amount);
        let cashback_amount = CashbackPolicy::amount_for(order_amount, cashback_percent);
        if cashback_amount <= Decimal::ZERO {
            return Err(CoreError::InvalidAmount(cashback_amount));
        }

        Ok(Self {
            order_id: order_id.to_string(),
            account_id: account_id.to_string(),
            order_amount,
            cashback_percent,
            cashback_amount,
            order_status: OrderStatus::Pending,
            cashback_status: CashbackStatus::Pending,
            delivery_date: None,
            return_period_ends: None,
            earned_entry_id: None,
            credited_entry_id: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply an order status update from purchase tracking.
    ///
    /// Delivery opens the return period from `delivered_at`, or from `now`
    /// when the tracker reports no date. A reported date may lie in the past
    /// but never after `now`. A return is only accepted while the period is
    /// still open.
    pub fn update_status(
        &mut self,
        next: OrderStatus,
        delivered_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        return_period: Duration,
    ) -> CoreResult<()> {
        if !self.order_status.can_transition_to(next) {
            return Err(CoreError::transition("order", self.order_status, next));
        }
        if delivered_at.is_some() && next != OrderStatus::Delivered {
            return Err(CoreError::InvalidDeliveryDate(format!(
                "order moving to {next} cannot carry a delivery date"
            )));
        }
        let delivered_at = delivered_at.unwrap_or(now);
        if delivered_at > now {
            return Err(CoreError::InvalidDeliveryDate(format!(
                "{delivered_at} is in the future"
            )));
        }
        if next == OrderStatus::Returned
            && self.return_period_ends.is_some_and(|ends| now > ends)
        {
            return Err(CoreError::transition(
                "order",
                self.order_status,
                "returned (return period closed)",
            ));
        }

        if next == OrderStatus::Delivered {
            self.delivery_date = Some(delivered_at);
            self.return_period_ends = Some(delivered_at + return_period);
        }
        self.order_status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn approve(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.cashback_status != CashbackStatus::Pending || self.order_status.voids_cashback() {
            return Err(CoreError::transition(
                "cashback",
                self.cashback_status,
                CashbackStatus::Approved,
            ));
        }
        self.cashback_status = CashbackStatus::Approved;
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> CoreResult<()> {
        if self.cashback_status.is_terminal() {
            return Err(CoreError::transition(
                "cashback",
                self.cashback_status,
                CashbackStatus::Rejected,
            ));
        }
        self.cashback_status = CashbackStatus::Rejected;
        self.rejection_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Why the cashback cannot be credited at `now`, if it cannot
    pub fn credit_blocker(&self, now: DateTime<Utc>) -> Option<String> {
        if self.order_status != OrderStatus::Delivered {
            return Some(format!("order is {}, not delivered", self.order_status));
        }
        if self.cashback_status != CashbackStatus::Approved {
            return Some(format!("cashback is {}, not approved", self.cashback_status));
        }
        match self.return_period_ends {
            Some(ends) if now > ends => None,
            Some(ends) => Some(format!("return period open until {ends}")),
            None => Some("delivery date unknown".to_string()),
        }
    }

    pub fn can_credit_cashback(&self, now: DateTime<Utc>) -> bool {
        self.credit_blocker(now).is_none()
    }

    /// Final settlement step; the balance mutation happens in the same unit of work
    pub fn mark_credited(&mut self, entry_id: &str, now: DateTime<Utc>) -> CoreResult<()> {
        if let Some(reason) = self.credit_blocker(now) {
            return Err(CoreError::CashbackNotEligible(reason));
        }
        self.cashback_status = CashbackStatus::Credited;
        self.credited_entry_id = Some(entry_id.to_string());
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn return_period() -> Duration {
        Duration::days(DEFAULT_RETURN_PERIOD_DAYS)
    }

    fn delivered_order(delivered_at: DateTime<Utc>) -> OrderCashback {
        let mut order = OrderCashback::track(
            "ord-1",
            "acc-1",
            dec!(6000),
            &CashbackPolicy::default(),
            delivered_at - Duration::days(3),
        )
        .unwrap();
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            order
                .update_status(status, None, delivered_at, return_period())
                .unwrap();
        }
        order
    }

    #[test]
    fn test_track_fixes_rate() {
        let order =
            OrderCashback::track("ord-1", "acc-1", dec!(6000), &CashbackPolicy::default(), Utc::now())
                .unwrap();
        assert_eq!(order.cashback_percent, dec!(3.0));
        assert_eq!(order.cashback_amount, dec!(180.00));
        assert_eq!(order.cashback_status, CashbackStatus::Pending);
    }

    #[test]
    fn test_track_rejects_non_positive_amount() {
        let err = OrderCashback::track("o", "a", dec!(0), &CashbackPolicy::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidAmount(dec!(0)));
    }

    #[test]
    fn test_delivery_opens_return_period() {
        let now = Utc::now();
        let order = delivered_order(now);
        assert_eq!(order.delivery_date, Some(now));
        assert_eq!(order.return_period_ends, Some(now + Duration::days(30)));
    }

    #[test]
    fn test_order_transitions() {
        let now = Utc::now();
        let mut order =
            OrderCashback::track("o", "a", dec!(100), &CashbackPolicy::default(), now).unwrap();

        assert!(order
            .update_status(OrderStatus::Returned, None, now, return_period())
            .is_err());
        order
            .update_status(OrderStatus::Shipped, None, now, return_period())
            .unwrap();
        assert!(order
            .update_status(OrderStatus::Confirmed, None, now, return_period())
            .is_err());
        order
            .update_status(OrderStatus::Cancelled, None, now, return_period())
            .unwrap();
        assert!(order
            .update_status(OrderStatus::Delivered, None, now, return_period())
            .is_err());
    }

    #[test]
    fn test_tracker_may_skip_to_delivered() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Delivered));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Returned));
        assert!(!OrderStatus::Returned.can_transition_to(OrderStatus::Delivered));
    }

    #[test]
    fn test_reported_delivery_date() {
        let now = Utc::now();
        let delivered_at = now - Duration::days(31);
        let mut order =
            OrderCashback::track("o", "a", dec!(5000), &CashbackPolicy::default(), now).unwrap();

        assert!(matches!(
            order.update_status(
                OrderStatus::Delivered,
                Some(now + Duration::hours(1)),
                now,
                return_period()
            ),
            Err(CoreError::InvalidDeliveryDate(_))
        ));
        assert!(matches!(
            order.update_status(
                OrderStatus::Shipped,
                Some(delivered_at),
                now,
                return_period()
            ),
            Err(CoreError::InvalidDeliveryDate(_))
        ));
        assert_eq!(order.order_status, OrderStatus::Pending);

        order
            .update_status(OrderStatus::Delivered, Some(delivered_at), now, return_period())
            .unwrap();
        assert_eq!(order.delivery_date, Some(delivered_at));
        assert_eq!(order.return_period_ends, Some(delivered_at + Duration::days(30)));

        order.approve(now).unwrap();
        assert!(order.can_credit_cashback(now));
    }

    #[test]
    fn test_return_only_within_period() {
        let delivered_at = Utc::now() - Duration::days(31);
        let mut order = delivered_order(delivered_at);
        assert!(order
            .update_status(OrderStatus::Returned, None, Utc::now(), return_period())
            .is_err());

        let mut fresh = delivered_order(Utc::now());
        assert!(fresh
            .update_status(OrderStatus::Returned, None, Utc::now(), return_period())
            .is_ok());
    }

    #[test]
    fn test_credit_requires_all_preconditions() {
        let now = Utc::now();

        // approved but return period still open
        let mut order = delivered_order(now - Duration::days(10));
        order.approve(now).unwrap();
        assert!(!order.can_credit_cashback(now));
        assert!(matches!(
            order.mark_credited("entry-1", now),
            Err(CoreError::CashbackNotEligible(_))
        ));

        // period elapsed but not approved
        let order = delivered_order(now - Duration::days(31));
        assert!(!order.can_credit_cashback(now));

        // everything satisfied
        let mut order = delivered_order(now - Duration::days(31));
        order.approve(now).unwrap();
        assert!(order.can_credit_cashback(now));
        order.mark_credited("entry-1", now).unwrap();
        assert_eq!(order.cashback_status, CashbackStatus::Credited);
        assert_eq!(order.credited_entry_id.as_deref(), Some("entry-1"));
    }

    #[test]
    fn test_exactly_at_period_end_is_not_eligible() {
        let delivered_at = Utc::now() - Duration::days(30);
        let mut order = delivered_order(delivered_at);
        order.approve(delivered_at).unwrap();
        let ends = order.return_period_ends.unwrap();
        assert!(!order.can_credit_cashback(ends));
        assert!(order.can_credit_cashback(ends + Duration::seconds(1)));
    }

    #[test]
    fn test_reject_paths() {
        let now = Utc::now();
        let mut order =
            OrderCashback::track("o", "a", dec!(100), &CashbackPolicy::default(), now).unwrap();
        order.approve(now).unwrap();
        order.reject("fraudulent order", now).unwrap();
        assert_eq!(order.cashback_status, CashbackStatus::Rejected);
        assert!(order.reject("again", now).is_err());
        assert!(order.approve(now).is_err());
    }

    #[test]
    fn test_cannot_approve_cancelled_order() {
        let now = Utc::now();
        let mut order =
            OrderCashback::track("o", "a", dec!(100), &CashbackPolicy::default(), now).unwrap();
        order
            .update_status(OrderStatus::Cancelled, None, now, return_period())
            .unwrap();
        assert!(order.approve(now).is_err());
    }
}
