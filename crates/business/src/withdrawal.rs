//! Withdrawal workflow - reserve on request, debit on confirmed payout
//!
//! Each request drives one `withdrawal` ledger entry:
//!
//! | request                  | entry                 | account                  |
//! |--------------------------|-----------------------|--------------------------|
//! | requested (pending)      | pending               | funds reserved           |
//! | approved                 | processing            | -                        |
//! | completed                | completed, restamped  | reserved funds debited   |
//! | rejected / cancelled     | cancelled             | reservation released     |
//! | failed                   | failed                | reservation kept         |
//! | retried                  | pending -> processing | -                        |
//! | failed, released         | failed                | reservation released     |

use crate::error::{ServiceError, ServiceResult};
use crate::notify::Notification;
use crate::services::ServiceContext;
use cashledger_core::{LedgerAccount, WithdrawalMethod, WithdrawalRequest, WithdrawalStatus};
use cashledger_ledger::{EntryType, LedgerEntry};
use cashledger_persistence::{AccountRepo, EntryRepo, WithdrawalRepo};
use rust_decimal::Decimal;
use tracing::{info, warn};

pub struct WithdrawalService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> WithdrawalService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Holder asks to cash out `amount`.
    ///
    /// A holder with a PIN must supply it; a wrong PIN is recorded against
    /// the account before the request fails.
    pub async fn request(
        &self,
        account_id: &str,
        amount: Decimal,
        method: WithdrawalMethod,
        pin: Option<&str>,
    ) -> ServiceResult<WithdrawalRequest> {
        let _guard = self.ctx.locks().lock(account_id).await;
        let now = self.ctx.now();
        let mut tx = self.ctx.db().pool().begin().await?;
        let mut account = AccountRepo::get_by_id(&mut tx, account_id).await?;

        account.ensure_not_frozen()?;
        if account.has_pin() {
            let Some(pin) = pin else {
                return Err(ServiceError::InvalidRequest(
                    "PIN required for withdrawal".to_string(),
                ));
            };
            if let Err(e) = account.verify_pin(pin, now, &self.ctx.config().pin_policy()) {
                AccountRepo::update(&mut tx, &account).await?;
                tx.commit().await?;
                warn!(account_id, error = %e, "withdrawal PIN check failed");
                return Err(e.into());
            }
        }
        if self.ctx.config().require_verification_for_withdrawal {
            account.ensure_verified()?;
        }

        let change = account.reserve_for_withdrawal(amount)?;
        let entry = LedgerEntry::record(account_id, EntryType::Withdrawal, -amount, change, now)
            .with_description(format!("Withdrawal via {method}"))
            .scored(self.ctx.scorer());
        let request = WithdrawalRequest::new(account_id, &entry.id, amount, method, now);

        AccountRepo::update(&mut tx, &account).await?;
        EntryRepo::insert(&mut tx, &entry).await?;
        WithdrawalRepo::insert(&mut tx, &request).await?;
        tx.commit().await?;

        info!(
            account_id,
            withdrawal_id = %request.id,
            %amount,
            %method,
            risk_score = entry.risk_score.value(),
            "withdrawal requested"
        );
        if self.ctx.scorer().is_high_risk(entry.risk_score) {
            warn!(
                account_id,
                withdrawal_id = %request.id,
                risk_score = entry.risk_score.value(),
                "high-risk withdrawal queued for review"
            );
        }
        self.ctx.notify(Notification::WithdrawalRequested {
            account_id: account_id.to_string(),
            withdrawal_id: request.id.clone(),
            amount,
        });
        Ok(request)
    }

    pub async fn get(&self, withdrawal_id: &str) -> ServiceResult<WithdrawalRequest> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(WithdrawalRepo::get_by_id(&mut conn, withdrawal_id).await?)
    }

    pub async fn list(&self, status: Option<WithdrawalStatus>) -> ServiceResult<Vec<WithdrawalRequest>> {
        let mut conn = self.ctx.db().pool().acquire().await?;
        Ok(WithdrawalRepo::list(&mut conn, status).await?)
    }

    /// Review approval; the payout starts
    pub async fn approve(&self, withdrawal_id: &str, reviewer: &str) -> ServiceResult<WithdrawalRequest> {
        let request = self
            .transition(withdrawal_id, |ctx, step| {
                step.account.ensure_not_frozen()?;
                step.request.approve(reviewer, ctx.now())?;
                step.entry.mark_processing(reviewer)?;
                Ok(())
            })
            .await?;

        info!(withdrawal_id, reviewer, "withdrawal approved");
        self.ctx.notify(Notification::WithdrawalApproved {
            account_id: request.account_id.clone(),
            withdrawal_id: request.id.clone(),
            amount: request.amount,
        });
        Ok(request)
    }

    /// Review rejection; the reservation is released
    pub async fn reject(
        &self,
        withdrawal_id: &str,
        reviewer: &str,
        reason: &str,
    ) -> ServiceResult<WithdrawalRequest> {
        let request = self
            .transition(withdrawal_id, |ctx, step| {
                let now = ctx.now();
                step.request.reject(reviewer, reason, now)?;
                step.account.release_reservation(step.request.amount)?;
                step.entry.cancel(reason, reviewer, now)?;
                Ok(())
            })
            .await?;

        info!(withdrawal_id, reviewer, reason, "withdrawal rejected");
        self.ctx.notify(Notification::WithdrawalRejected {
            account_id: request.account_id.clone(),
            withdrawal_id: request.id.clone(),
            reason: reason.to_string(),
        });
        Ok(request)
    }

    /// Holder cancellation while the request is still pending
    pub async fn cancel(&self, withdrawal_id: &str, account_id: &str) -> ServiceResult<WithdrawalRequest> {
        let owner = self.get(withdrawal_id).await?.account_id;
        if owner != account_id {
            return Err(ServiceError::NotFound {
                entity: "Withdrawal".to_string(),
                id: withdrawal_id.to_string(),
            });
        }

        let request = self
            .transition(withdrawal_id, |ctx, step| {
                let now = ctx.now();
                step.request.cancel("cancelled by holder", now)?;
                step.account.release_reservation(step.request.amount)?;
                step.entry.cancel("cancelled by holder", account_id, now)?;
                Ok(())
            })
            .await?;

        info!(withdrawal_id, account_id, "withdrawal cancelled");
        Ok(request)
    }

    /// Payout confirmed by the provider. Completing twice debits once.
    pub async fn complete(
        &self,
        withdrawal_id: &str,
        external_transaction_id: &str,
        processed_by: &str,
    ) -> ServiceResult<WithdrawalRequest> {
        let existing = self.get(withdrawal_id).await?;
        if existing.status == WithdrawalStatus::Completed {
            info!(withdrawal_id, "withdrawal already completed");
            return Ok(existing);
        }

        let request = self
            .transition(withdrawal_id, |ctx, step| {
                let now = ctx.now();
                if !step.request.complete(external_transaction_id, now)? {
                    return Ok(());
                }
                let change = step.account.commit_withdrawal(step.request.amount)?;
                step.entry.restamp(change)?;
                step.entry.mark_completed(processed_by, now)?;
                Ok(())
            })
            .await?;

        info!(
            withdrawal_id,
            external_transaction_id,
            amount = %request.amount,
            "withdrawal completed"
        );
        self.ctx.notify(Notification::WithdrawalCompleted {
            account_id: request.account_id.clone(),
            withdrawal_id: request.id.clone(),
            external_transaction_id: external_transaction_id.to_string(),
        });
        Ok(request)
    }

    /// Payout failed; the reservation stays in place
    pub async fn fail(
        &self,
        withdrawal_id: &str,
        reason: &str,
        processed_by: &str,
    ) -> ServiceResult<WithdrawalRequest> {
        let request = self
            .transition(withdrawal_id, |ctx, step| {
                let now = ctx.now();
                step.request.fail(reason, now)?;
                step.entry.mark_failed(reason, processed_by, now)?;
                Ok(())
            })
            .await?;

        warn!(withdrawal_id, reason, "withdrawal payout failed");
        Ok(request)
    }

    /// Try a failed payout again, bounded by `max_retries`
    pub async fn retry_payout(&self, withdrawal_id: &str, processed_by: &str) -> ServiceResult<WithdrawalRequest> {
        let request = self
            .transition(withdrawal_id, |ctx, step| {
                step.account.ensure_not_frozen()?;
                step.entry.retry(ctx.config().max_retries)?;
                step.entry.mark_processing(processed_by)?;
                step.request.retry(ctx.now())?;
                Ok(())
            })
            .await?;

        info!(withdrawal_id, processed_by, "withdrawal payout retried");
        Ok(request)
    }

    /// Give up on a failed payout and hand the reserved funds back
    pub async fn release_failed(&self, withdrawal_id: &str, reviewer: &str) -> ServiceResult<WithdrawalRequest> {
        let request = self
            .transition(withdrawal_id, |_, step| {
                step.request.release_failed(reviewer)?;
                step.account.release_reservation(step.request.amount)?;
                Ok(())
            })
            .await?;

        info!(withdrawal_id, reviewer, "failed withdrawal reservation released");
        Ok(request)
    }

    /// Cancel pending requests older than the configured expiry.
    ///
    /// Does nothing unless `stale_withdrawal_expiry_hours` is set.
    pub async fn expire_stale(&self) -> ServiceResult<Vec<WithdrawalRequest>> {
        let Some(max_age) = self.ctx.config().stale_withdrawal_expiry() else {
            return Ok(Vec::new());
        };
        let cutoff = self.ctx.now() - max_age;
        let stale = {
            let mut conn = self.ctx.db().pool().acquire().await?;
            WithdrawalRepo::list_pending_before(&mut conn, cutoff).await?
        };

        let reason = format!("expired after {} hours pending", max_age.num_hours());
        let mut expired = Vec::with_capacity(stale.len());
        for candidate in stale {
            let result = self
                .transition(&candidate.id, |ctx, step| {
                    let now = ctx.now();
                    step.request.cancel(&reason, now)?;
                    step.account.release_reservation(step.request.amount)?;
                    step.entry.cancel(&reason, "system", now)?;
                    Ok(())
                })
                .await;
            match result {
                Ok(request) => {
                    info!(withdrawal_id = %request.id, "stale withdrawal expired");
                    self.ctx.notify(Notification::WithdrawalRejected {
                        account_id: request.account_id.clone(),
                        withdrawal_id: request.id.clone(),
                        reason: reason.clone(),
                    });
                    expired.push(request);
                }
                // Processed concurrently between listing and locking
                Err(e) => warn!(withdrawal_id = %candidate.id, error = %e, "stale withdrawal skipped"),
            }
        }
        Ok(expired)
    }

    /// Load request, account and entry under the account lock, apply `step`,
    /// write all three back in one transaction
    async fn transition<F>(&self, withdrawal_id: &str, step: F) -> ServiceResult<WithdrawalRequest>
    where
        F: FnOnce(&ServiceContext, &mut WithdrawalStep) -> ServiceResult<()>,
    {
        let account_id = self.get(withdrawal_id).await?.account_id;

        let _guard = self.ctx.locks().lock(&account_id).await;
        let mut tx = self.ctx.db().pool().begin().await?;
        let request = WithdrawalRepo::get_by_id(&mut tx, withdrawal_id).await?;
        let account = AccountRepo::get_by_id(&mut tx, &account_id).await?;
        let entry = EntryRepo::get_by_id(&mut tx, &request.entry_id).await?;

        let mut state = WithdrawalStep {
            request,
            account,
            entry,
        };
        step(self.ctx, &mut state)?;

        AccountRepo::update(&mut tx, &state.account).await?;
        EntryRepo::update(&mut tx, &state.entry).await?;
        WithdrawalRepo::update(&mut tx, &state.request).await?;
        tx.commit().await?;
        Ok(state.request)
    }
}

/// The three records one withdrawal step touches
pub struct WithdrawalStep {
    pub request: WithdrawalRequest,
    pub account: LedgerAccount,
    pub entry: LedgerEntry,
}
