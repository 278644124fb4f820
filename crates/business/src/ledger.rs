//! Ledger operations - postings, PIN, administrative account changes,
//! reversals and reconciliation
//!
//! Every mutation follows one shape: take the account lock, open a
//! transaction, load the account, apply the core operation, record the entry
//! from the snapshot it returned, write both, commit. Any error before commit
//! drops the transaction and leaves no trace.

use crate::error::{ServiceError, ServiceResult};
use crate::notify::Notification;
use crate::services::ServiceContext;
use cashledger_core::{
    AccountSummary, BalanceChange, CoreError, LedgerAccount, VerificationStatus,
};
use cashledger_ledger::{
    reconcile, EntryFilter, EntryStatus, EntryType, LedgerEntry, LifetimeTotals, Reconciliation,
    RECONCILIATION_REPAIR,
};
use cashledger_persistence::{AccountRepo, EntryRepo};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::{info, warn};

/// A direct credit or debit
#[derive(Debug, Clone)]
pub struct Posting {
    pub account_id: String,
    pub entry_type: EntryType,
    /// Unsigned; the direction comes from the operation
    pub amount: Decimal,
    pub description: Option<String>,
    pub related_ad_id: Option<String>,
    pub related_order_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub processed_by: Option<String>,
}

impl Posting {
    pub fn new(account_id: &str, entry_type: EntryType, amount: Decimal) -> Self {
        Self {
            account_id: account_id.to_string(),
            entry_type,
            amount,
            description: None,
            related_ad_id: None,
            related_order_id: None,
            idempotency_key: None,
            processed_by: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn ad(mut self, ad_id: &str) -> Self {
        self.related_ad_id = Some(ad_id.to_string());
        self
    }

    pub fn order(mut self, order_id: &str) -> Self {
        self.related_order_id = Some(order_id.to_string());
        self
    }

    pub fn idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub fn processed_by(mut self, by: &str) -> Self {
        self.processed_by = Some(by.to_string());
        self
    }

    fn into_entry(self, signed_amount: Decimal, change: BalanceChange, ctx: &ServiceContext) -> LedgerEntry {
        let mut entry = LedgerEntry::record(
            &self.account_id,
            self.entry_type,
            signed_amount,
            change,
            ctx.now(),
        );
        entry.description = self.description;
        entry.related_ad_id = self.related_ad_id;
        entry.related_order_id = self.related_order_id;
        entry.idempotency_key = self.idempotency_key;
        entry.processed_by = self.processed_by;
        entry.scored(ctx.scorer())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Credit,
    Debit,
}

/// Types that may be posted directly as a credit
fn credit_type(entry_type: EntryType) -> bool {
    matches!(
        entry_type,
        EntryType::AdRevenue
            | EntryType::Deposit
            | EntryType::Refund
            | EntryType::Bonus
            | EntryType::Adjustment
    )
}

/// Types that may be posted directly as a debit
fn debit_type(entry_type: EntryType) -> bool {
    matches!(entry_type, EntryType::Penalty | EntryType::Adjustment)
}

/// Validate the snapshot of a settled entry, then append
pub(crate) async fn append_entry(
    conn: &mut SqliteConnection,
    entry: &LedgerEntry,
) -> ServiceResult<()> {
    if entry.status.has_settled() {
        entry.check_snapshot()?;
    }
    EntryRepo::insert(conn, entry).await?;
    Ok(())
}

/// Result of a reconciliation run, with the repair entries if any were written
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub report: Reconciliation,
    pub repair_entries: Vec<LedgerEntry>,
}

/// Atomic ledger operations on accounts and entries
pub struct LedgerService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> LedgerService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    // === Accounts ===

    /// Create the ledger account for a newly signed-up user
    pub async fn open_account(&self, user_id: &str) -> ServiceResult<LedgerAccount> {
        let config = self.ctx.config();
        let account = LedgerAccount::open(user_id, &config.currency, config.default_minimum_withdrawal);

        let mut conn = self.ctx.db().pool().acquire().await?;
        AccountRepo::insert(&mut conn, &account).await?;
        info!(account_id = account.id(), user_id, "account opened");
        Ok(account)
    }

    pub async fn get_account(&self, account_id: &str) -> ServiceResult<LedgerAccount> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(AccountRepo::get_by_id(&mut conn, account_id).await?)
    }

    pub async fn find_by_user(&self, user_id: &str) -> ServiceResult<Option<LedgerAccount>> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(AccountRepo::find_by_user(&mut conn, user_id).await?)
    }

    pub async fn summary(&self, account_id: &str) -> ServiceResult<AccountSummary> {
        Ok(self.get_account(account_id).await?.summary())
    }

    // === Postings ===

    /// Credit the balance; `ad-revenue`, `deposit`, `refund`, `bonus`, `adjustment`
    pub async fn credit(&self, posting: Posting) -> ServiceResult<LedgerEntry> {
        if !credit_type(posting.entry_type) {
            return Err(ServiceError::InvalidRequest(format!(
                "{} cannot be posted as a direct credit",
                posting.entry_type
            )));
        }
        self.post(posting, Direction::Credit).await
    }

    /// Debit the balance; `penalty`, `adjustment`
    pub async fn debit(&self, posting: Posting) -> ServiceResult<LedgerEntry> {
        if !debit_type(posting.entry_type) {
            return Err(ServiceError::InvalidRequest(format!(
                "{} cannot be posted as a direct debit",
                posting.entry_type
            )));
        }
        self.post(posting, Direction::Debit).await
    }

    /// Signed manual adjustment by an admin
    pub async fn adjust(
        &self,
        account_id: &str,
        amount: Decimal,
        reason: &str,
        admin: &str,
    ) -> ServiceResult<LedgerEntry> {
        let posting = Posting::new(account_id, EntryType::Adjustment, amount.abs())
            .description(reason)
            .processed_by(admin);
        if amount < Decimal::ZERO {
            self.debit(posting).await
        } else {
            self.credit(posting).await
        }
    }

    async fn post(&self, posting: Posting, direction: Direction) -> ServiceResult<LedgerEntry> {
        let _guard = self.ctx.locks().lock(&posting.account_id).await;
        let mut tx = self.ctx.db().pool().begin().await?;

        if let Some(key) = posting.idempotency_key.as_deref() {
            if EntryRepo::find_by_idempotency_key(&mut tx, key).await?.is_some() {
                return Err(CoreError::DuplicateEntry(key.to_string()).into());
            }
        }

        let mut account = AccountRepo::get_by_id(&mut tx, &posting.account_id).await?;
        let amount = posting.amount;
        let (signed, change) = match direction {
            Direction::Credit => (amount, account.credit(amount)?),
            Direction::Debit => (-amount, account.debit(amount)?),
        };
        let entry = posting.into_entry(signed, change, self.ctx);

        AccountRepo::update(&mut tx, &account).await?;
        append_entry(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(
            account_id = %entry.account_id,
            entry_id = %entry.id,
            entry_type = %entry.entry_type,
            amount = %entry.amount,
            balance = %entry.balance_after,
            "entry posted"
        );
        self.warn_if_high_risk(&entry);
        Ok(entry)
    }

    pub(crate) fn warn_if_high_risk(&self, entry: &LedgerEntry) {
        if self.ctx.scorer().is_high_risk(entry.risk_score) {
            warn!(
                account_id = %entry.account_id,
                entry_id = %entry.id,
                risk_score = entry.risk_score.value(),
                "high-risk entry queued for review"
            );
        }
    }

    // === PIN ===

    pub async fn set_pin(&self, account_id: &str, pin: &str) -> ServiceResult<()> {
        self.mutate(account_id, |account| account.set_pin(pin)).await?;
        info!(account_id, "PIN set");
        Ok(())
    }

    /// Verify a PIN. A failed attempt is persisted before the error is returned.
    pub async fn verify_pin(&self, account_id: &str, pin: &str) -> ServiceResult<()> {
        let _guard = self.ctx.locks().lock(account_id).await;
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut account = AccountRepo::get_by_id(&mut tx, account_id).await?;

        let result = account.verify_pin(pin, self.ctx.now(), &self.ctx.config().pin_policy());
        if !matches!(result, Err(CoreError::PinNotSet)) {
            AccountRepo::update(&mut tx, &account).await?;
            tx.commit().await?;
        }
        if let Err(ref e) = result {
            warn!(account_id, error = %e, "PIN verification failed");
        }
        Ok(result?)
    }

    // === Administrative ===

    pub async fn freeze(&self, account_id: &str, reason: &str) -> ServiceResult<LedgerAccount> {
        let account = self
            .mutate(account_id, |account| {
                account.freeze(reason);
                Ok(())
            })
            .await?;
        warn!(account_id, reason, "account frozen");
        self.ctx.notify(Notification::AccountFrozen {
            account_id: account_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(account)
    }

    pub async fn unfreeze(&self, account_id: &str) -> ServiceResult<LedgerAccount> {
        let account = self
            .mutate(account_id, |account| {
                account.unfreeze();
                Ok(())
            })
            .await?;
        info!(account_id, "account unfrozen");
        Ok(account)
    }

    pub async fn set_verification(
        &self,
        account_id: &str,
        status: VerificationStatus,
    ) -> ServiceResult<LedgerAccount> {
        let account = self
            .mutate(account_id, |account| {
                account.set_verification(status);
                Ok(())
            })
            .await?;
        info!(account_id, %status, "verification status updated");
        Ok(account)
    }

    pub async fn set_minimum_withdrawal(
        &self,
        account_id: &str,
        minimum: Decimal,
    ) -> ServiceResult<LedgerAccount> {
        self.mutate(account_id, |account| account.set_minimum_withdrawal(minimum))
            .await
    }

    /// Account-only change with no entry
    async fn mutate<F>(&self, account_id: &str, change: F) -> ServiceResult<LedgerAccount>
    where
        F: FnOnce(&mut LedgerAccount) -> Result<(), CoreError>,
    {
        let _guard = self.ctx.locks().lock(account_id).await;
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut account = AccountRepo::get_by_id(&mut tx, account_id).await?;
        change(&mut account)?;
        AccountRepo::update(&mut tx, &account).await?;
        tx.commit().await?;
        Ok(account)
    }

    // === Entries ===

    pub async fn get_entry(&self, entry_id: &str) -> ServiceResult<LedgerEntry> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(EntryRepo::get_by_id(&mut conn, entry_id).await?)
    }

    pub async fn entries(&self, account_id: &str) -> ServiceResult<Vec<LedgerEntry>> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(EntryRepo::list_for_account(&mut conn, account_id).await?)
    }

    pub async fn list_entries(&self, filter: &EntryFilter) -> ServiceResult<Vec<LedgerEntry>> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(EntryRepo::list(&mut conn, filter).await?)
    }

    /// Tag an entry; a new tag raises its risk score
    pub async fn add_fraud_flag(&self, entry_id: &str, tag: &str) -> ServiceResult<LedgerEntry> {
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut entry = EntryRepo::get_by_id(&mut tx, entry_id).await?;
        let increment = self.ctx.config().risk.fraud_flag_increment;
        if entry.add_fraud_flag(tag, increment) {
            EntryRepo::update(&mut tx, &entry).await?;
            tx.commit().await?;
            warn!(entry_id, tag, risk_score = entry.risk_score.value(), "fraud flag added");
        }
        Ok(entry)
    }

    /// Undo a settled entry with a compensating entry.
    ///
    /// The account receives the opposite mutation without touching lifetime
    /// counters. Pool entries never settle, so cashback is voided through
    /// settlement instead.
    pub async fn reverse_entry(
        &self,
        entry_id: &str,
        reason: &str,
        admin: &str,
    ) -> ServiceResult<LedgerEntry> {
        let account_id = self.get_entry(entry_id).await?.account_id;

        let _guard = self.ctx.locks().lock(&account_id).await;
        let now = self.ctx.now();
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut entry = EntryRepo::get_by_id(&mut tx, entry_id).await?;
        let mut account = AccountRepo::get_by_id(&mut tx, &account_id).await?;

        let reversal = reverse_in_place(&mut account, &mut entry, reason, admin, now)?;

        AccountRepo::update(&mut tx, &account).await?;
        EntryRepo::update(&mut tx, &entry).await?;
        append_entry(&mut tx, &reversal).await?;
        tx.commit().await?;

        warn!(
            account_id = %account_id,
            entry_id,
            reversal_id = %reversal.id,
            amount = %reversal.amount,
            reason,
            "entry reversed"
        );
        Ok(reversal)
    }

    // === Reconciliation ===

    /// Compare the balance with the log; with `repair`, record the
    /// unexplained difference and reverse it so both agree again.
    pub async fn reconcile(
        &self,
        account_id: &str,
        repair: bool,
        admin: &str,
    ) -> ServiceResult<ReconcileOutcome> {
        let _guard = self.ctx.locks().lock(account_id).await;
        let now = self.ctx.now();
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut account = AccountRepo::get_by_id(&mut tx, account_id).await?;
        let entries = EntryRepo::list_for_account(&mut tx, account_id).await?;

        let report = reconcile(
            account_id,
            account.state().opening_balance,
            account.balance(),
            &entries,
        );
        if report.is_balanced() {
            return Ok(ReconcileOutcome {
                report,
                repair_entries: Vec::new(),
            });
        }

        warn!(
            account_id,
            expected = %report.expected_balance,
            actual = %report.actual_balance,
            divergence = %report.divergence,
            "ledger divergence detected"
        );
        if !repair {
            return Ok(ReconcileOutcome {
                report,
                repair_entries: Vec::new(),
            });
        }

        // Record the unlogged change, then reverse it
        let divergence = report.divergence;
        let mut unexplained = LedgerEntry::record(
            account_id,
            EntryType::Adjustment,
            divergence,
            BalanceChange {
                before: report.actual_balance - divergence,
                after: report.actual_balance,
            },
            now,
        )
        .with_description("Unrecorded balance change found by reconciliation")
        .with_processed_by(admin)
        .with_flag(RECONCILIATION_REPAIR);
        let change = account.apply_correction(-divergence)?;
        let reversal = unexplained.reverse(change, "reconciliation repair", admin, now)?;

        AccountRepo::update(&mut tx, &account).await?;
        append_entry(&mut tx, &unexplained).await?;
        append_entry(&mut tx, &reversal).await?;
        tx.commit().await?;

        info!(account_id, %divergence, balance = %account.balance(), "ledger divergence repaired");
        Ok(ReconcileOutcome {
            report,
            repair_entries: vec![unexplained, reversal],
        })
    }

    /// Lifetime counters recomputed from the log
    pub async fn lifetime_totals(&self, account_id: &str) -> ServiceResult<LifetimeTotals> {
        let entries = self.entries(account_id).await?;
        Ok(LifetimeTotals::from_entries(&entries))
    }
}

/// Apply the opposite account mutation and build the compensating entry
fn reverse_in_place(
    account: &mut LedgerAccount,
    entry: &mut LedgerEntry,
    reason: &str,
    by: &str,
    now: DateTime<Utc>,
) -> ServiceResult<LedgerEntry> {
    if entry.is_reversal() {
        return Err(CoreError::transition("ledger entry", "reversal", EntryStatus::Reversed).into());
    }
    if !entry.status.can_transition_to(EntryStatus::Reversed) {
        return Err(CoreError::transition("ledger entry", entry.status, EntryStatus::Reversed).into());
    }
    let change = account.apply_correction(-entry.amount)?;
    Ok(entry.reverse(change, reason, by, now)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use cashledger_persistence::Database;
    use rust_decimal_macros::dec;

    async fn setup() -> ServiceContext {
        let db = Database::in_memory().await.unwrap();
        ServiceContext::new(db, LedgerConfig::default())
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let ctx = setup().await;
        let svc = LedgerService::new(&ctx);
        let account = svc.open_account("user-1").await.unwrap();

        let credit = svc
            .credit(Posting::new(account.id(), EntryType::Bonus, dec!(150)))
            .await
            .unwrap();
        assert_eq!(credit.balance_before, dec!(0));
        assert_eq!(credit.balance_after, dec!(150));

        let debit = svc
            .debit(Posting::new(account.id(), EntryType::Penalty, dec!(50)))
            .await
            .unwrap();
        assert_eq!(debit.amount, dec!(-50));

        let summary = svc.summary(account.id()).await.unwrap();
        assert_eq!(summary.balance, dec!(100));
        assert_eq!(summary.total_earned, dec!(150));
        assert_eq!(summary.total_spent, dec!(50));
    }

    #[tokio::test]
    async fn test_wrong_direction_rejected() {
        let ctx = setup().await;
        let svc = LedgerService::new(&ctx);
        let account = svc.open_account("user-1").await.unwrap();

        let err = svc
            .credit(Posting::new(account.id(), EntryType::Withdrawal, dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));

        let err = svc
            .debit(Posting::new(account.id(), EntryType::Bonus, dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_failed_debit_leaves_no_trace() {
        let ctx = setup().await;
        let svc = LedgerService::new(&ctx);
        let account = svc.open_account("user-1").await.unwrap();
        svc.credit(Posting::new(account.id(), EntryType::Deposit, dec!(20)))
            .await
            .unwrap();

        let err = svc
            .debit(Posting::new(account.id(), EntryType::Penalty, dec!(25)))
            .await
            .unwrap_err();
        assert!(err.core().is_some_and(|e| e.is_insufficient_funds()));
        assert_eq!(svc.entries(account.id()).await.unwrap().len(), 1);
        assert_eq!(svc.summary(account.id()).await.unwrap().balance, dec!(20));
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key() {
        let ctx = setup().await;
        let svc = LedgerService::new(&ctx);
        let account = svc.open_account("user-1").await.unwrap();
        let posting = Posting::new(account.id(), EntryType::AdRevenue, dec!(5)).idempotency_key("evt-1");

        svc.credit(posting.clone()).await.unwrap();
        let err = svc.credit(posting).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(svc.summary(account.id()).await.unwrap().balance, dec!(5));
    }

    #[tokio::test]
    async fn test_verify_pin_persists_failures() {
        let ctx = setup().await;
        let svc = LedgerService::new(&ctx);
        let account = svc.open_account("user-1").await.unwrap();
        svc.set_pin(account.id(), "4321").await.unwrap();

        for _ in 0..3 {
            assert!(svc.verify_pin(account.id(), "0000").await.is_err());
        }
        let err = svc.verify_pin(account.id(), "4321").await.unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::PinLocked { .. })));

        let stored = svc.get_account(account.id()).await.unwrap();
        assert_eq!(stored.state().pin_attempts, 3);
        assert!(stored.is_pin_locked(ctx.now()));
    }

    #[tokio::test]
    async fn test_reverse_entry() {
        let ctx = setup().await;
        let svc = LedgerService::new(&ctx);
        let account = svc.open_account("user-1").await.unwrap();
        let bonus = svc
            .credit(Posting::new(account.id(), EntryType::Bonus, dec!(40)))
            .await
            .unwrap();

        let reversal = svc.reverse_entry(&bonus.id, "granted twice", "admin").await.unwrap();
        assert_eq!(reversal.amount, dec!(-40));
        assert_eq!(reversal.original_entry_id.as_deref(), Some(bonus.id.as_str()));

        let original = svc.get_entry(&bonus.id).await.unwrap();
        assert_eq!(original.reversal_entry_id.as_deref(), Some(reversal.id.as_str()));

        let summary = svc.summary(account.id()).await.unwrap();
        assert_eq!(summary.balance, dec!(0));
        // counters only move on activity
        assert_eq!(summary.total_earned, dec!(40));

        // a reversal cannot be reversed, nor can the original twice
        assert!(svc.reverse_entry(&reversal.id, "again", "admin").await.is_err());
        assert!(svc.reverse_entry(&bonus.id, "again", "admin").await.is_err());

        let outcome = svc.reconcile(account.id(), false, "admin").await.unwrap();
        assert!(outcome.report.is_balanced());
    }

    #[tokio::test]
    async fn test_add_fraud_flag_is_idempotent() {
        let ctx = setup().await;
        let svc = LedgerService::new(&ctx);
        let account = svc.open_account("user-1").await.unwrap();
        let entry = svc
            .credit(Posting::new(account.id(), EntryType::Bonus, dec!(1)))
            .await
            .unwrap();

        let flagged = svc.add_fraud_flag(&entry.id, "velocity").await.unwrap();
        assert_eq!(flagged.risk_score.value(), 20);
        let again = svc.add_fraud_flag(&entry.id, "velocity").await.unwrap();
        assert_eq!(again.risk_score.value(), 20);
        assert_eq!(again.fraud_flags.len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_repairs_divergence() {
        let ctx = setup().await;
        let svc = LedgerService::new(&ctx);
        let account = svc.open_account("user-1").await.unwrap();
        svc.credit(Posting::new(account.id(), EntryType::Deposit, dec!(100)))
            .await
            .unwrap();

        // balance changed behind the log's back
        {
            let mut conn = ctx.db().pool().acquire().await.unwrap();
            let mut tampered = AccountRepo::get_by_id(&mut conn, account.id()).await.unwrap();
            tampered.apply_correction(dec!(30)).unwrap();
            AccountRepo::update(&mut conn, &tampered).await.unwrap();
        }

        let report = svc.reconcile(account.id(), false, "admin").await.unwrap();
        assert_eq!(report.report.divergence, dec!(30));
        assert!(report.repair_entries.is_empty());

        let repaired = svc.reconcile(account.id(), true, "admin").await.unwrap();
        assert_eq!(repaired.repair_entries.len(), 2);
        assert_eq!(svc.summary(account.id()).await.unwrap().balance, dec!(100));

        let after = svc.reconcile(account.id(), false, "admin").await.unwrap();
        assert!(after.report.is_balanced());

        let totals = svc.lifetime_totals(account.id()).await.unwrap();
        assert_eq!(totals.total_earned, dec!(100));
    }
}
