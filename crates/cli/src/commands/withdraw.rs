//! Withdrawal commands

use anyhow::Result;
use cashledger_business::{ServiceContext, WithdrawalService};
use cashledger_core::WithdrawalRequest;

use super::finish;
use crate::WithdrawAction;

/// Handle withdraw subcommands
pub async fn handle(ctx: &ServiceContext, operator: &str, action: WithdrawAction) -> Result<()> {
    let svc = WithdrawalService::new(ctx);

    match action {
        WithdrawAction::Request {
            account_id,
            amount,
            method,
            pin,
        } => {
            let request = svc.request(&account_id, amount, method, pin.as_deref()).await?;
            println!("📤 Withdrawal {} requested: {} via {}", request.id, amount, method);
        }
        WithdrawAction::Approve { withdrawal_id } => {
            svc.approve(&withdrawal_id, operator).await?;
            println!("✅ Withdrawal {} approved", withdrawal_id);
        }
        WithdrawAction::Reject {
            withdrawal_id,
            reason,
        } => {
            svc.reject(&withdrawal_id, operator, &reason).await?;
            println!("❌ Withdrawal {} rejected: {}", withdrawal_id, reason);
        }
        WithdrawAction::Cancel {
            withdrawal_id,
            account_id,
        } => {
            svc.cancel(&withdrawal_id, &account_id).await?;
            println!("↩️  Withdrawal {} cancelled", withdrawal_id);
        }
        WithdrawAction::Complete {
            withdrawal_id,
            external_transaction_id,
        } => {
            let request = svc
                .complete(&withdrawal_id, &external_transaction_id, operator)
                .await?;
            println!("✅ Withdrawal {} completed ({})", request.id, external_transaction_id);
        }
        WithdrawAction::Fail {
            withdrawal_id,
            reason,
        } => {
            svc.fail(&withdrawal_id, &reason, operator).await?;
            println!("⚠️  Withdrawal {} failed: {}", withdrawal_id, reason);
        }
        WithdrawAction::Retry { withdrawal_id } => {
            svc.retry_payout(&withdrawal_id, operator).await?;
            println!("🔁 Withdrawal {} retried", withdrawal_id);
        }
        WithdrawAction::Release { withdrawal_id } => {
            svc.release_failed(&withdrawal_id, operator).await?;
            println!("✅ Reservation of withdrawal {} released", withdrawal_id);
        }
        WithdrawAction::Expire => {
            let expired = svc.expire_stale().await?;
            println!("🧹 {} stale withdrawal(s) expired", expired.len());
            for request in &expired {
                print_request(request);
            }
        }
        WithdrawAction::List { status } => {
            let requests = svc.list(status).await?;
            println!("📋 {} withdrawal(s)", requests.len());
            for request in &requests {
                print_request(request);
            }
        }
    }

    finish(ctx).await;
    Ok(())
}

fn print_request(request: &WithdrawalRequest) {
    println!(
        "   {} {} {:>12} {:<13} {:<9} {}",
        request.requested_at.format("%Y-%m-%d %H:%M"),
        request.id,
        request.amount,
        request.method,
        request.status,
        request.account_id
    );
}
