//! Direct credits, debits and ad earnings

use anyhow::Result;
use cashledger_business::{AdEarning, EarningsService, LedgerService, Posting, ServiceContext};
use cashledger_ledger::{EntryType, LedgerEntry};
use rust_decimal::Decimal;

use super::finish;
use crate::AdAction;

pub async fn credit(
    ctx: &ServiceContext,
    account_id: &str,
    amount: Decimal,
    entry_type: EntryType,
    description: Option<String>,
    operator: &str,
) -> Result<()> {
    let mut posting = Posting::new(account_id, entry_type, amount).processed_by(operator);
    if let Some(description) = description {
        posting = posting.description(description);
    }
    let entry = LedgerService::new(ctx).credit(posting).await?;
    print_posted("💰 Credited", &entry);
    finish(ctx).await;
    Ok(())
}

pub async fn debit(
    ctx: &ServiceContext,
    account_id: &str,
    amount: Decimal,
    entry_type: EntryType,
    description: Option<String>,
    operator: &str,
) -> Result<()> {
    let mut posting = Posting::new(account_id, entry_type, amount).processed_by(operator);
    if let Some(description) = description {
        posting = posting.description(description);
    }
    let entry = LedgerService::new(ctx).debit(posting).await?;
    print_posted("💸 Debited", &entry);
    finish(ctx).await;
    Ok(())
}

pub async fn ad(ctx: &ServiceContext, action: AdAction) -> Result<()> {
    match action {
        AdAction::Credit {
            event_id,
            account_id,
            ad_id,
            amount,
            kind,
        } => {
            let earning = AdEarning {
                event_id,
                account_id,
                ad_id,
                kind,
                amount,
            };
            let entry = EarningsService::new(ctx).credit(&earning).await?;
            print_posted("📺 Ad revenue credited", &entry);
        }
    }
    finish(ctx).await;
    Ok(())
}

fn print_posted(label: &str, entry: &LedgerEntry) {
    println!("{} {} ({})", label, entry.amount.abs(), entry.entry_type);
    println!("   Entry:   {}", entry.id);
    println!("   Balance: {} → {}", entry.balance_before, entry.balance_after);
    if entry.risk_score.value() > 0 {
        println!("   Risk:    {}", entry.risk_score.value());
    }
}
