//! Order cashback commands

use anyhow::Result;
use cashledger_business::{ServiceContext, SettlementService};
use cashledger_core::OrderCashback;

use super::finish;
use crate::OrderAction;

/// Handle order subcommands
pub async fn handle(ctx: &ServiceContext, action: OrderAction) -> Result<()> {
    let settlement = SettlementService::new(ctx);

    match action {
        OrderAction::Track {
            order_id,
            account_id,
            amount,
        } => {
            let order = settlement.track_order(&order_id, &account_id, amount).await?;
            println!(
                "🛒 Tracking {}: {}% cashback = {} (pending)",
                order.order_id, order.cashback_percent, order.cashback_amount
            );
        }
        OrderAction::Status {
            order_id,
            status,
            delivered_at,
        } => {
            let order = settlement
                .update_order_status(&order_id, status, delivered_at)
                .await?;
            println!(
                "📦 Order {} is {}, cashback {}",
                order.order_id, order.order_status, order.cashback_status
            );
        }
        OrderAction::Approve { order_id } => {
            settlement.approve_cashback(&order_id).await?;
            println!("✅ Cashback approved for {}", order_id);
        }
        OrderAction::Reject { order_id, reason } => {
            settlement.reject_cashback(&order_id, &reason).await?;
            println!("❌ Cashback rejected for {}: {}", order_id, reason);
        }
        OrderAction::Credit { order_id } => {
            let entry = settlement.credit_cashback(&order_id).await?;
            println!("💰 Cashback {} credited for {}", entry.amount, order_id);
            println!("   Balance: {} → {}", entry.balance_before, entry.balance_after);
        }
        OrderAction::SettleDue => {
            let report = settlement.settle_due().await?;
            println!("🧾 Settlement: {} credited, {} failed", report.credited.len(), report.failed.len());
            for (order_id, entry_id) in &report.credited {
                println!("   ✅ {} → entry {}", order_id, entry_id);
            }
            for (order_id, error) in &report.failed {
                println!("   ❌ {}: {}", order_id, error);
            }
        }
        OrderAction::Show { order_id } => {
            let order = settlement.get_order(&order_id).await?;
            print_order(&order);
        }
    }

    finish(ctx).await;
    Ok(())
}

fn print_order(order: &OrderCashback) {
    println!("🛒 Order {}", order.order_id);
    println!("   Account:         {}", order.account_id);
    println!("   Amount:          {}", order.order_amount);
    println!("   Cashback:        {} ({}%)", order.cashback_amount, order.cashback_percent);
    println!("   Order status:    {}", order.order_status);
    println!("   Cashback status: {}", order.cashback_status);
    if let Some(ends) = order.return_period_ends {
        println!("   Returns until:   {}", ends.format("%Y-%m-%d %H:%M"));
    }
    if let Some(reason) = &order.rejection_reason {
        println!("   Rejected:        {}", reason);
    }
}
