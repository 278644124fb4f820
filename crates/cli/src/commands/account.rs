//! Account management commands

use anyhow::Result;
use cashledger_business::{AdminService, LedgerService, ServiceContext};
use cashledger_core::LedgerAccount;

use super::finish;
use crate::AccountAction;

/// Handle account subcommands
pub async fn handle(ctx: &ServiceContext, operator: &str, action: AccountAction) -> Result<()> {
    let ledger = LedgerService::new(ctx);
    let admin = AdminService::new(ctx, operator);

    match action {
        AccountAction::Open { user_id } => {
            let account = ledger.open_account(&user_id).await?;
            println!("✅ Opened account {} for {}", account.id(), user_id);
        }
        AccountAction::Show { account_id } => {
            let account = ledger.get_account(&account_id).await?;
            print_account(&account);
        }
        AccountAction::Entries { account_id } => {
            let entries = ledger.entries(&account_id).await?;
            println!("📒 {} entries for {}", entries.len(), account_id);
            for entry in &entries {
                println!(
                    "   {} {:<18} {:>12} {:>12} → {:<12} {:<10} risk {}",
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.entry_type,
                    entry.amount,
                    entry.balance_before,
                    entry.balance_after,
                    entry.status,
                    entry.risk_score.value()
                );
            }
        }
        AccountAction::Freeze { account_id, reason } => {
            admin.freeze(&account_id, &reason).await?;
            println!("🧊 Account {} frozen: {}", account_id, reason);
        }
        AccountAction::Unfreeze { account_id } => {
            admin.unfreeze(&account_id).await?;
            println!("✅ Account {} unfrozen", account_id);
        }
        AccountAction::Verify { account_id, status } => {
            admin.set_verification(&account_id, status).await?;
            println!("✅ Account {} verification: {}", account_id, status);
        }
        AccountAction::SetPin { account_id, pin } => {
            ledger.set_pin(&account_id, &pin).await?;
            println!("🔐 PIN set for {}", account_id);
        }
        AccountAction::SetMinimum { account_id, amount } => {
            admin.set_minimum_withdrawal(&account_id, amount).await?;
            println!("✅ Minimum withdrawal for {} set to {}", account_id, amount);
        }
    }

    finish(ctx).await;
    Ok(())
}

fn print_account(account: &LedgerAccount) {
    let state = account.state();
    let summary = account.summary();
    println!("👤 Account {}", summary.account_id);
    println!("   User:                {}", state.user_id);
    println!("   Currency:            {}", summary.currency);
    println!("   Balance:             {}", summary.balance);
    println!("   Available:           {}", summary.available_balance);
    println!("   Pending cashback:    {}", summary.pending_cashback);
    println!("   Pending withdrawals: {}", summary.pending_withdrawals);
    println!("   Total earned:        {}", summary.total_earned);
    println!("   Total withdrawn:     {}", summary.total_withdrawn);
    println!("   Total spent:         {}", summary.total_spent);
    println!("   Minimum withdrawal:  {}", state.minimum_withdrawal);
    println!("   Verification:        {}", state.verification);
    println!("   PIN:                 {}", if account.has_pin() { "set" } else { "not set" });
    match &state.freeze_reason {
        Some(reason) if state.is_frozen => println!("   Frozen:              yes ({})", reason),
        _ => println!("   Frozen:              no"),
    }
}
