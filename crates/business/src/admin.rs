//! Admin operations - review queue, corrections, platform statistics
//!
//! AdminService is the operator surface over the other services. Every
//! mutating call records the acting admin.

use crate::error::ServiceResult;
use crate::ledger::{LedgerService, ReconcileOutcome};
use crate::services::ServiceContext;
use crate::withdrawal::WithdrawalService;
use cashledger_core::{LedgerAccount, VerificationStatus, WithdrawalRequest, WithdrawalStatus};
use cashledger_ledger::{EntryFilter, LedgerEntry};
use cashledger_persistence::{AccountRepo, EntryRepo, WithdrawalRepo};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Platform-wide totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub accounts: usize,
    pub frozen_accounts: usize,
    pub total_balance: Decimal,
    pub total_pending_cashback: Decimal,
    pub total_pending_withdrawals: Decimal,
    pub entries_by_status: BTreeMap<String, i64>,
    pub pending_withdrawal_requests: usize,
}

pub struct AdminService<'a> {
    ctx: &'a ServiceContext,
    admin_id: String,
}

impl<'a> AdminService<'a> {
    pub fn new(ctx: &'a ServiceContext, admin_id: &str) -> Self {
        Self {
            ctx,
            admin_id: admin_id.to_string(),
        }
    }

    fn ledger(&self) -> LedgerService<'a> {
        LedgerService::new(self.ctx)
    }

    fn withdrawals(&self) -> WithdrawalService<'a> {
        WithdrawalService::new(self.ctx)
    }

    // === Entries ===

    pub async fn list_entries(&self, filter: &EntryFilter) -> ServiceResult<Vec<LedgerEntry>> {
        self.ledger().list_entries(filter).await
    }

    /// Entries at or above the high-risk threshold, riskiest first
    pub async fn high_risk_queue(&self, limit: u32) -> ServiceResult<Vec<LedgerEntry>> {
        let threshold = self.ctx.config().risk.high_risk_threshold;
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(EntryRepo::high_risk(&mut conn, threshold, limit).await?)
    }

    pub async fn add_fraud_flag(&self, entry_id: &str, tag: &str) -> ServiceResult<LedgerEntry> {
        info!(admin = %self.admin_id, entry_id, tag, "fraud flag requested");
        self.ledger().add_fraud_flag(entry_id, tag).await
    }

    pub async fn force_reversal(&self, entry_id: &str, reason: &str) -> ServiceResult<LedgerEntry> {
        self.ledger()
            .reverse_entry(entry_id, reason, &self.admin_id)
            .await
    }

    /// Signed manual adjustment
    pub async fn adjust(
        &self,
        account_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> ServiceResult<LedgerEntry> {
        self.ledger()
            .adjust(account_id, amount, reason, &self.admin_id)
            .await
    }

    // === Accounts ===

    pub async fn freeze(&self, account_id: &str, reason: &str) -> ServiceResult<LedgerAccount> {
        info!(admin = %self.admin_id, account_id, "freeze requested");
        self.ledger().freeze(account_id, reason).await
    }

    pub async fn unfreeze(&self, account_id: &str) -> ServiceResult<LedgerAccount> {
        info!(admin = %self.admin_id, account_id, "unfreeze requested");
        self.ledger().unfreeze(account_id).await
    }

    pub async fn set_verification(
        &self,
        account_id: &str,
        status: VerificationStatus,
    ) -> ServiceResult<LedgerAccount> {
        self.ledger().set_verification(account_id, status).await
    }

    pub async fn set_minimum_withdrawal(
        &self,
        account_id: &str,
        minimum: Decimal,
    ) -> ServiceResult<LedgerAccount> {
        self.ledger().set_minimum_withdrawal(account_id, minimum).await
    }

    pub async fn frozen_accounts(&self) -> ServiceResult<Vec<LedgerAccount>> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(AccountRepo::list_frozen(&mut conn).await?)
    }

    pub async fn reconcile_account(
        &self,
        account_id: &str,
        repair: bool,
    ) -> ServiceResult<ReconcileOutcome> {
        self.ledger()
            .reconcile(account_id, repair, &self.admin_id)
            .await
    }

    /// Reconcile every account, returning only the divergent ones
    pub async fn reconcile_all(&self, repair: bool) -> ServiceResult<Vec<ReconcileOutcome>> {
        let accounts = {
            let mut conn = self.ctx.db().pool().acquire().await?;
            AccountRepo::list(&mut conn).await?
        };
        let mut divergent = Vec::new();
        for account in accounts {
            let outcome = self.reconcile_account(account.id(), repair).await?;
            if !outcome.report.is_balanced() {
                divergent.push(outcome);
            }
        }
        Ok(divergent)
    }

    // === Withdrawals ===

    pub async fn list_withdrawals(
        &self,
        status: Option<WithdrawalStatus>,
    ) -> ServiceResult<Vec<WithdrawalRequest>> {
        self.withdrawals().list(status).await
    }

    pub async fn approve_withdrawal(&self, withdrawal_id: &str) -> ServiceResult<WithdrawalRequest> {
        self.withdrawals().approve(withdrawal_id, &self.admin_id).await
    }

    pub async fn reject_withdrawal(
        &self,
        withdrawal_id: &str,
        reason: &str,
    ) -> ServiceResult<WithdrawalRequest> {
        self.withdrawals()
            .reject(withdrawal_id, &self.admin_id, reason)
            .await
    }

    pub async fn complete_withdrawal(
        &self,
        withdrawal_id: &str,
        external_transaction_id: &str,
    ) -> ServiceResult<WithdrawalRequest> {
        self.withdrawals()
            .complete(withdrawal_id, external_transaction_id, &self.admin_id)
            .await
    }

    pub async fn release_failed_withdrawal(
        &self,
        withdrawal_id: &str,
    ) -> ServiceResult<WithdrawalRequest> {
        self.withdrawals()
            .release_failed(withdrawal_id, &self.admin_id)
            .await
    }

    // === Statistics ===

    pub async fn stats(&self) -> ServiceResult<LedgerStats> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        let accounts = AccountRepo::list(&mut conn).await?;
        let entries_by_status = EntryRepo::count_by_status(&mut conn).await?;
        let pending = WithdrawalRepo::list(&mut conn, Some(WithdrawalStatus::Pending)).await?;

        let mut stats = LedgerStats {
            accounts: accounts.len(),
            entries_by_status: entries_by_status.into_iter().collect(),
            pending_withdrawal_requests: pending.len(),
            ..Default::default()
        };
        for account in &accounts {
            if account.is_frozen() {
                stats.frozen_accounts += 1;
            }
            stats.total_balance += account.balance();
            stats.total_pending_cashback += account.pending_cashback();
            stats.total_pending_withdrawals += account.pending_withdrawals();
        }
        Ok(stats)
    }
}
