//! Admin commands - review queue, corrections, statistics

use anyhow::Result;
use cashledger_business::{AdminService, ReconcileOutcome, ServiceContext};
use cashledger_ledger::{EntryFilter, LedgerEntry};

use super::finish;
use crate::AdminAction;

/// Handle admin subcommands
pub async fn handle(ctx: &ServiceContext, operator: &str, action: AdminAction) -> Result<()> {
    let admin = AdminService::new(ctx, operator);

    match action {
        AdminAction::Entries {
            account,
            r#type,
            status,
            min_risk,
            limit,
        } => {
            let mut filter = EntryFilter::new().limit(limit);
            if let Some(account) = account.as_deref() {
                filter = filter.account(account);
            }
            if let Some(entry_type) = r#type {
                filter = filter.entry_type(entry_type);
            }
            if let Some(status) = status {
                filter = filter.status(status);
            }
            if let Some(score) = min_risk {
                filter = filter.min_risk_score(score);
            }
            let entries = admin.list_entries(&filter).await?;
            println!("📒 {} entries", entries.len());
            print_entries(&entries);
        }
        AdminAction::HighRisk { limit } => {
            let entries = admin.high_risk_queue(limit).await?;
            println!("🚨 {} high-risk entries", entries.len());
            print_entries(&entries);
        }
        AdminAction::Reverse { entry_id, reason } => {
            let reversal = admin.force_reversal(&entry_id, &reason).await?;
            println!("↩️  Entry {} reversed by {}", entry_id, reversal.id);
            println!("   Balance: {} → {}", reversal.balance_before, reversal.balance_after);
        }
        AdminAction::Flag { entry_id, tag } => {
            let entry = admin.add_fraud_flag(&entry_id, &tag).await?;
            println!("🚩 Entry {} flagged '{}', risk {}", entry_id, tag, entry.risk_score.value());
        }
        AdminAction::Adjust {
            account_id,
            amount,
            reason,
        } => {
            let entry = admin.adjust(&account_id, amount, &reason).await?;
            println!("✏️  Adjusted {} by {}", account_id, entry.amount);
            println!("   Balance: {} → {}", entry.balance_before, entry.balance_after);
        }
        AdminAction::Reconcile { account_id, repair } => match account_id {
            Some(account_id) => {
                let outcome = admin.reconcile_account(&account_id, repair).await?;
                print_reconciliation(&outcome);
            }
            None => {
                let divergent = admin.reconcile_all(repair).await?;
                if divergent.is_empty() {
                    println!("✅ All accounts agree with their entry log");
                }
                for outcome in &divergent {
                    print_reconciliation(outcome);
                }
            }
        },
        AdminAction::Stats => {
            let stats = admin.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    finish(ctx).await;
    Ok(())
}

fn print_entries(entries: &[LedgerEntry]) {
    for entry in entries {
        let flags: Vec<&str> = entry.fraud_flags.iter().map(String::as_str).collect();
        println!(
            "   {} {} {:<18} {:>12} {:<10} risk {:>3} {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.id,
            entry.entry_type,
            entry.amount,
            entry.status,
            entry.risk_score.value(),
            flags.join(",")
        );
    }
}

fn print_reconciliation(outcome: &ReconcileOutcome) {
    let report = &outcome.report;
    if report.is_balanced() {
        println!("✅ {} balanced at {}", report.account_id, report.actual_balance);
        return;
    }
    println!("⚠️  {} diverges by {}", report.account_id, report.divergence);
    println!("   Expected: {}", report.expected_balance);
    println!("   Actual:   {}", report.actual_balance);
    for entry in &outcome.repair_entries {
        println!("   Repair entry {} ({})", entry.id, entry.amount);
    }
}
