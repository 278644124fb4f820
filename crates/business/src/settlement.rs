//! Cashback settlement - tracked orders through to credited cashback
//!
//! Tracking an order parks its cashback in the account's pending pool and
//! records a `pending` cashback-earned entry. Crediting moves it into the
//! spendable balance with a `cashback-credited` entry, once the order is
//! delivered, the cashback approved and the return period over. Cancelled
//! or returned orders void the cashback. Either way the earned entry is
//! closed as `cancelled`, so only the credited entry ever counts toward the
//! balance.

use crate::error::{ServiceError, ServiceResult};
use crate::ledger::append_entry;
use crate::notify::Notification;
use crate::services::ServiceContext;
use cashledger_core::{CashbackStatus, CoreError, LedgerAccount, OrderCashback, OrderStatus};
use cashledger_ledger::{EntryType, LedgerEntry};
use cashledger_persistence::{AccountRepo, EntryRepo, OrderRepo};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

/// Outcome of one settlement sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettlementReport {
    /// `(order_id, credited entry id)`
    pub credited: Vec<(String, String)>,
    /// `(order_id, error)`
    pub failed: Vec<(String, String)>,
}

impl SettlementReport {
    pub fn total(&self) -> usize {
        self.credited.len() + self.failed.len()
    }
}

pub struct SettlementService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> SettlementService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Start tracking a purchase and park its cashback in the pending pool
    pub async fn track_order(
        &self,
        order_id: &str,
        account_id: &str,
        order_amount: Decimal,
    ) -> ServiceResult<OrderCashback> {
        let _guard = self.ctx.locks().lock(account_id).await;
        let now = self.ctx.now();
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut account = AccountRepo::get_by_id(&mut tx, account_id).await?;

        let mut order = OrderCashback::track(
            order_id,
            account_id,
            order_amount,
            &self.ctx.config().cashback,
            now,
        )?;
        let change = account.add_pending_cashback(order.cashback_amount)?;
        let earned = LedgerEntry::record(
            account_id,
            EntryType::CashbackEarned,
            order.cashback_amount,
            change,
            now,
        )
        .with_order(order_id)
        .with_description(format!(
            "{}% cashback on order {}",
            order.cashback_percent, order_id
        ));
        order.earned_entry_id = Some(earned.id.clone());

        AccountRepo::update(&mut tx, &account).await?;
        append_entry(&mut tx, &earned).await?;
        OrderRepo::insert(&mut tx, &order).await?;
        tx.commit().await?;

        info!(
            account_id,
            order_id,
            percent = %order.cashback_percent,
            cashback = %order.cashback_amount,
            "order tracked"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &str) -> ServiceResult<OrderCashback> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(OrderRepo::get_by_id(&mut conn, order_id).await?)
    }

    pub async fn orders_for_account(&self, account_id: &str) -> ServiceResult<Vec<OrderCashback>> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(OrderRepo::list_for_account(&mut conn, account_id).await?)
    }

    /// Apply an order status update; cancellation or return voids the cashback.
    ///
    /// `delivered_at` is the delivery time reported by purchase tracking and
    /// only accompanies `delivered`; the clock is used when it is absent.
    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<OrderCashback> {
        let account_id = self.get_order(order_id).await?.account_id;

        let _guard = self.ctx.locks().lock(&account_id).await;
        let now = self.ctx.now();
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut order = OrderRepo::get_by_id(&mut tx, order_id).await?;
        order.update_status(status, delivered_at, now, self.ctx.config().return_period())?;

        if status.voids_cashback() && !order.cashback_status.is_terminal() {
            let mut account = AccountRepo::get_by_id(&mut tx, &account_id).await?;
            void_cashback(&mut tx, &mut account, &mut order, &format!("order {status}"), now)
                .await?;
            AccountRepo::update(&mut tx, &account).await?;
        }
        OrderRepo::update(&mut tx, &order).await?;
        tx.commit().await?;

        info!(order_id, %status, cashback_status = %order.cashback_status, "order status updated");
        Ok(order)
    }

    pub async fn approve_cashback(&self, order_id: &str) -> ServiceResult<OrderCashback> {
        let account_id = self.get_order(order_id).await?.account_id;

        let _guard = self.ctx.locks().lock(&account_id).await;
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut order = OrderRepo::get_by_id(&mut tx, order_id).await?;
        order.approve(self.ctx.now())?;
        OrderRepo::update(&mut tx, &order).await?;
        tx.commit().await?;

        info!(order_id, "cashback approved");
        Ok(order)
    }

    /// Reject the cashback and take it out of the pending pool
    pub async fn reject_cashback(&self, order_id: &str, reason: &str) -> ServiceResult<OrderCashback> {
        let account_id = self.get_order(order_id).await?.account_id;

        let _guard = self.ctx.locks().lock(&account_id).await;
        let now = self.ctx.now();
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut order = OrderRepo::get_by_id(&mut tx, order_id).await?;
        let mut account = AccountRepo::get_by_id(&mut tx, &account_id).await?;

        void_cashback(&mut tx, &mut account, &mut order, reason, now).await?;
        AccountRepo::update(&mut tx, &account).await?;
        OrderRepo::update(&mut tx, &order).await?;
        tx.commit().await?;

        info!(order_id, reason, "cashback rejected");
        Ok(order)
    }

    /// Why an order's cashback cannot be credited right now, if it cannot
    pub async fn credit_blocker(&self, order_id: &str) -> ServiceResult<Option<String>> {
        let order = self.get_order(order_id).await?;
        Ok(order.credit_blocker(self.ctx.now()))
    }

    /// Move an order's cashback into the spendable balance.
    ///
    /// Crediting an already credited order returns the original entry and
    /// changes nothing.
    pub async fn credit_cashback(&self, order_id: &str) -> ServiceResult<LedgerEntry> {
        let account_id = self.get_order(order_id).await?.account_id;

        let _guard = self.ctx.locks().lock(&account_id).await;
        let now = self.ctx.now();
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut order = OrderRepo::get_by_id(&mut tx, order_id).await?;

        if order.cashback_status == CashbackStatus::Credited {
            if let Some(entry_id) = order.credited_entry_id.as_deref() {
                info!(order_id, entry_id, "cashback already credited");
                return Ok(EntryRepo::get_by_id(&mut tx, entry_id).await?);
            }
        }
        if let Some(reason) = order.credit_blocker(now) {
            return Err(CoreError::CashbackNotEligible(reason).into());
        }

        let mut account = AccountRepo::get_by_id(&mut tx, &account_id).await?;
        let change = account.credit_pending_cashback(order.cashback_amount)?;
        let entry = LedgerEntry::record(
            &account_id,
            EntryType::CashbackCredited,
            order.cashback_amount,
            change,
            now,
        )
        .with_order(order_id)
        .with_description(format!("Cashback for order {order_id}"));
        order.mark_credited(&entry.id, now)?;

        AccountRepo::update(&mut tx, &account).await?;
        append_entry(&mut tx, &entry).await?;
        close_earned_entry(
            &mut tx,
            &order,
            &format!("settled by cashback-credited entry {}", entry.id),
            now,
        )
        .await?;
        OrderRepo::update(&mut tx, &order).await?;
        tx.commit().await?;

        info!(
            account_id = %account_id,
            order_id,
            entry_id = %entry.id,
            amount = %entry.amount,
            "cashback credited"
        );
        self.ctx.notify(Notification::CashbackCredited {
            account_id,
            order_id: order_id.to_string(),
            amount: entry.amount,
        });
        Ok(entry)
    }

    /// Credit every order whose return period has ended.
    ///
    /// Orders are settled one by one; a failure on one does not stop the rest.
    pub async fn settle_due(&self) -> ServiceResult<SettlementReport> {
        let due = {
            let mut conn = self.ctx.db().pool().acquire().await?;
            OrderRepo::list_due(&mut conn, self.ctx.now()).await?
        };

        let mut report = SettlementReport::default();
        for order in due {
            match self.credit_cashback(&order.order_id).await {
                Ok(entry) => report.credited.push((order.order_id, entry.id)),
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "settlement failed");
                    report.failed.push((order.order_id, e.to_string()));
                }
            }
        }
        info!(
            credited = report.credited.len(),
            failed = report.failed.len(),
            "settlement sweep finished"
        );
        Ok(report)
    }
}

/// Reject the cashback and release it from the pool
async fn void_cashback(
    conn: &mut SqliteConnection,
    account: &mut LedgerAccount,
    order: &mut OrderCashback,
    reason: &str,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    order.reject(reason, now)?;
    account.release_pending_cashback(order.cashback_amount)?;
    close_earned_entry(conn, order, reason, now).await
}

/// Cancel the pending cashback-earned entry of an order
async fn close_earned_entry(
    conn: &mut SqliteConnection,
    order: &OrderCashback,
    reason: &str,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let Some(entry_id) = order.earned_entry_id.as_deref() else {
        return Err(ServiceError::InvalidRequest(format!(
            "order {} has no cashback-earned entry",
            order.order_id
        )));
    };
    let mut earned = EntryRepo::get_by_id(conn, entry_id).await?;
    earned.cancel(reason, "settlement", now)?;
    EntryRepo::update(conn, &earned).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::LedgerService;
    use crate::services::ManualClock;
    use cashledger_ledger::EntryStatus;
    use cashledger_persistence::Database;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn setup() -> (ServiceContext, Arc<ManualClock>) {
        let db = Database::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap(),
        ));
        let ctx = ServiceContext::new(db, LedgerConfig::default()).with_clock(clock.clone());
        (ctx, clock)
    }

    async fn deliver(svc: &SettlementService<'_>, order_id: &str) {
        for status in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
            svc.update_order_status(order_id, status, None).await.unwrap();
        }
    }

    async fn execute(ctx: &ServiceContext, sql: &str) {
        let mut conn = ctx.db().pool().acquire().await.unwrap();
        sqlx::query(sql).execute(&mut *conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_track_parks_cashback() {
        let (ctx, _) = setup().await;
        let ledger = LedgerService::new(&ctx);
        let account = ledger.open_account("user-1").await.unwrap();
        let svc = SettlementService::new(&ctx);

        let order = svc.track_order("ord-1", account.id(), dec!(1000)).await.unwrap();
        assert_eq!(order.cashback_percent, dec!(2.5));
        assert_eq!(order.cashback_amount, dec!(25.00));

        let summary = ledger.summary(account.id()).await.unwrap();
        assert_eq!(summary.pending_cashback, dec!(25.00));
        assert_eq!(summary.balance, dec!(0));

        let earned = ledger
            .get_entry(order.earned_entry_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(earned.status, EntryStatus::Pending);
        assert_eq!(earned.balance_before, earned.balance_after);

        // the order insert fails last; the pool and the log are untouched
        let err = svc.track_order("ord-1", account.id(), dec!(1000)).await.unwrap_err();
        assert!(err.is_duplicate());
        let summary = ledger.summary(account.id()).await.unwrap();
        assert_eq!(summary.pending_cashback, dec!(25.00));
        assert_eq!(ledger.entries(account.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credit_after_return_period() {
        let (ctx, clock) = setup().await;
        let ledger = LedgerService::new(&ctx);
        let account = ledger.open_account("user-1").await.unwrap();
        let svc = SettlementService::new(&ctx);

        let order = svc.track_order("ord-1", account.id(), dec!(500)).await.unwrap();
        let err = svc.credit_cashback("ord-1").await.unwrap_err();
        assert!(matches!(err.core(), Some(CoreError::CashbackNotEligible(_))));

        deliver(&svc, "ord-1").await;
        svc.approve_cashback("ord-1").await.unwrap();

        let err = svc.credit_cashback("ord-1").await.unwrap_err();
        assert!(matches!(err.core(), Some(CoreError::CashbackNotEligible(_))));

        clock.advance(Duration::days(30) + Duration::seconds(1));
        let entry = svc.credit_cashback("ord-1").await.unwrap();
        assert_eq!(entry.amount, dec!(10.00));
        assert_eq!(entry.balance_after, dec!(10.00));

        // second credit is a no-op returning the same entry
        let again = svc.credit_cashback("ord-1").await.unwrap();
        assert_eq!(again.id, entry.id);

        let summary = ledger.summary(account.id()).await.unwrap();
        assert_eq!(summary.balance, dec!(10.00));
        assert_eq!(summary.pending_cashback, dec!(0));

        let earned = ledger
            .get_entry(order.earned_entry_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(earned.status, EntryStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_back_dated_delivery() {
        let (ctx, _) = setup().await;
        let ledger = LedgerService::new(&ctx);
        let account = ledger.open_account("user-1").await.unwrap();
        let svc = SettlementService::new(&ctx);
        svc.track_order("ord-1", account.id(), dec!(5000)).await.unwrap();

        let err = svc
            .update_order_status("ord-1", OrderStatus::Delivered, Some(ctx.now() + Duration::days(1)))
            .await
            .unwrap_err();
        assert!(matches!(err.core(), Some(CoreError::InvalidDeliveryDate(_))));

        // tracking reports the delivery late, skipping the intermediate states
        let delivered_at = ctx.now() - Duration::days(31);
        let order = svc
            .update_order_status("ord-1", OrderStatus::Delivered, Some(delivered_at))
            .await
            .unwrap();
        assert_eq!(order.delivery_date, Some(delivered_at));
        assert_eq!(order.return_period_ends, Some(delivered_at + Duration::days(30)));

        svc.approve_cashback("ord-1").await.unwrap();
        let entry = svc.credit_cashback("ord-1").await.unwrap();
        assert_eq!(entry.amount, dec!(150.00));
        assert_eq!(entry.balance_after - entry.balance_before, dec!(150.00));
        assert_eq!(ledger.summary(account.id()).await.unwrap().pending_cashback, dec!(0));
    }

    #[tokio::test]
    async fn test_completed_entries_explain_balance() {
        let (ctx, clock) = setup().await;
        let ledger = LedgerService::new(&ctx);
        let account = ledger.open_account("user-1").await.unwrap();
        let svc = SettlementService::new(&ctx);

        svc.track_order("ord-1", account.id(), dec!(6000)).await.unwrap();
        deliver(&svc, "ord-1").await;
        svc.approve_cashback("ord-1").await.unwrap();
        svc.track_order("ord-2", account.id(), dec!(400)).await.unwrap();
        svc.reject_cashback("ord-2", "fraudulent order").await.unwrap();
        clock.advance(Duration::days(31));
        svc.credit_cashback("ord-1").await.unwrap();

        let entries = ledger.entries(account.id()).await.unwrap();
        let completed: Vec<_> = entries
            .iter()
            .filter(|e| e.status == EntryStatus::Completed)
            .collect();
        assert_eq!(completed.len(), 1);
        for entry in &completed {
            assert_eq!(entry.balance_after - entry.balance_before, entry.amount);
        }

        let summary = ledger.summary(account.id()).await.unwrap();
        let logged: Decimal = completed.iter().map(|e| e.amount).sum();
        assert_eq!(logged, summary.balance);
        assert_eq!(summary.balance, dec!(180.00));
        assert_eq!(summary.total_earned, dec!(180.00));
        assert!(ledger
            .reconcile(account.id(), false, "admin")
            .await
            .unwrap()
            .report
            .is_balanced());
    }

    #[tokio::test]
    async fn test_failed_credit_leaves_no_partial_writes() {
        let (ctx, clock) = setup().await;
        let ledger = LedgerService::new(&ctx);
        let account = ledger.open_account("user-1").await.unwrap();
        let svc = SettlementService::new(&ctx);

        let order = svc.track_order("ord-1", account.id(), dec!(1000)).await.unwrap();
        deliver(&svc, "ord-1").await;
        svc.approve_cashback("ord-1").await.unwrap();
        clock.advance(Duration::days(31));

        // the order update is the last write of the unit
        execute(
            &ctx,
            "CREATE TRIGGER block_credit BEFORE UPDATE ON order_cashbacks \
             WHEN NEW.cashback_status = 'credited' \
             BEGIN SELECT RAISE(ABORT, 'order store unavailable'); END",
        )
        .await;
        let err = svc.credit_cashback("ord-1").await.unwrap_err();
        assert!(err.is_infrastructure());

        let summary = ledger.summary(account.id()).await.unwrap();
        assert_eq!(summary.balance, dec!(0));
        assert_eq!(summary.pending_cashback, dec!(25.00));
        assert_eq!(summary.total_earned, dec!(0));
        let entries = ledger.entries(account.id()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, order.earned_entry_id.clone().unwrap());
        assert_eq!(entries[0].status, EntryStatus::Pending);
        assert_eq!(
            svc.get_order("ord-1").await.unwrap().cashback_status,
            CashbackStatus::Approved
        );

        execute(&ctx, "DROP TRIGGER block_credit").await;
        let entry = svc.credit_cashback("ord-1").await.unwrap();
        assert_eq!(entry.balance_after, dec!(25.00));
    }

    #[tokio::test]
    async fn test_cancel_voids_cashback() {
        let (ctx, _) = setup().await;
        let ledger = LedgerService::new(&ctx);
        let account = ledger.open_account("user-1").await.unwrap();
        let svc = SettlementService::new(&ctx);

        let order = svc.track_order("ord-1", account.id(), dec!(200)).await.unwrap();
        let cancelled = svc
            .update_order_status("ord-1", OrderStatus::Cancelled, None)
            .await
            .unwrap();
        assert_eq!(cancelled.cashback_status, CashbackStatus::Rejected);

        let summary = ledger.summary(account.id()).await.unwrap();
        assert_eq!(summary.pending_cashback, dec!(0));
        assert_eq!(summary.balance, dec!(0));

        let earned = ledger
            .get_entry(order.earned_entry_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(earned.status, EntryStatus::Cancelled);
        assert_eq!(earned.failure_reason.as_deref(), Some("order cancelled"));
        assert_eq!(ledger.entries(account.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settle_due_sweep() {
        let (ctx, clock) = setup().await;
        let account = LedgerService::new(&ctx).open_account("user-1").await.unwrap();
        let svc = SettlementService::new(&ctx);

        for id in ["ord-1", "ord-2"] {
            svc.track_order(id, account.id(), dec!(100)).await.unwrap();
            deliver(&svc, id).await;
            svc.approve_cashback(id).await.unwrap();
        }
        svc.track_order("ord-3", account.id(), dec!(100)).await.unwrap();

        assert_eq!(svc.settle_due().await.unwrap().total(), 0);

        clock.advance(Duration::days(31));
        let report = svc.settle_due().await.unwrap();
        assert_eq!(report.credited.len(), 2);
        assert!(report.failed.is_empty());

        let summary = LedgerService::new(&ctx).summary(account.id()).await.unwrap();
        assert_eq!(summary.balance, dec!(4.00));
        assert_eq!(summary.pending_cashback, dec!(2.00));
    }
}
