//! CashLedger CLI - ledger operations from the command line
//!
//! Usage:
//! ```bash
//! cashledger init
//! cashledger account open user-42
//! cashledger credit <ACCOUNT_ID> 250 --type deposit
//! cashledger order track ORD-1 <ACCOUNT_ID> 5000
//! cashledger withdraw request <ACCOUNT_ID> 200 --method upi --pin 1234
//! cashledger admin high-risk --limit 20
//! ```

use anyhow::Result;
use cashledger_core::{OrderStatus, VerificationStatus, WithdrawalMethod, WithdrawalStatus};
use cashledger_ledger::{EntryStatus, EntryType};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

mod commands;
mod db;

use commands::{account, admin, ledger, order, withdraw};

/// CashLedger - cashback, ad revenue and withdrawals on one ledger
#[derive(Parser)]
#[command(name = "cashledger")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Database file path
    #[arg(long, default_value = "data/cashledger.db", global = true)]
    pub db: PathBuf,

    /// JSON configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Operator recorded on administrative actions
    #[arg(long, default_value = "cli", global = true)]
    pub operator: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database schema
    Init {
        /// Delete an existing database first
        #[arg(long)]
        force: bool,
    },

    /// Show database status
    Status,

    /// Account management
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Credit an account
    Credit {
        account_id: String,
        amount: Decimal,
        /// ad-revenue, deposit, refund, bonus or adjustment
        #[arg(long, short = 't', default_value = "deposit")]
        r#type: EntryType,
        #[arg(long, short)]
        description: Option<String>,
    },

    /// Debit an account
    Debit {
        account_id: String,
        amount: Decimal,
        /// penalty or adjustment
        #[arg(long, short = 't', default_value = "penalty")]
        r#type: EntryType,
        #[arg(long, short)]
        description: Option<String>,
    },

    /// Order cashback settlement
    Order {
        #[command(subcommand)]
        action: OrderAction,
    },

    /// Withdrawal workflow
    Withdraw {
        #[command(subcommand)]
        action: WithdrawAction,
    },

    /// Advertising earnings
    Ad {
        #[command(subcommand)]
        action: AdAction,
    },

    /// Administrative queries and corrections
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
pub enum AccountAction {
    /// Open the ledger account of a user
    Open { user_id: String },
    /// Show balances and status
    Show { account_id: String },
    /// List the entry log of an account
    Entries { account_id: String },
    /// Freeze an account
    Freeze { account_id: String, reason: String },
    /// Lift a freeze
    Unfreeze { account_id: String },
    /// Record the verification decision
    Verify {
        account_id: String,
        /// unverified, pending, approved or rejected
        status: VerificationStatus,
    },
    /// Set or replace the withdrawal PIN
    SetPin { account_id: String, pin: String },
    /// Change the minimum withdrawal amount
    SetMinimum { account_id: String, amount: Decimal },
}

#[derive(Subcommand)]
pub enum OrderAction {
    /// Start tracking an order and park its cashback
    Track {
        order_id: String,
        account_id: String,
        amount: Decimal,
    },
    /// Apply an order status update
    Status {
        order_id: String,
        /// confirmed, shipped, delivered, cancelled or returned
        status: OrderStatus,
        /// Reported delivery time (RFC 3339), only with `delivered`
        #[arg(long)]
        delivered_at: Option<DateTime<Utc>>,
    },
    /// Approve the cashback
    Approve { order_id: String },
    /// Reject the cashback
    Reject { order_id: String, reason: String },
    /// Credit the cashback into the balance
    Credit { order_id: String },
    /// Credit every order whose return period has ended
    SettleDue,
    /// Show an order
    Show { order_id: String },
}

#[derive(Subcommand)]
pub enum WithdrawAction {
    /// Request a withdrawal
    Request {
        account_id: String,
        amount: Decimal,
        /// bank-transfer, upi, paypal or gift-card
        #[arg(long, short, default_value = "bank-transfer")]
        method: WithdrawalMethod,
        #[arg(long)]
        pin: Option<String>,
    },
    /// Approve a pending request
    Approve { withdrawal_id: String },
    /// Reject a pending request
    Reject { withdrawal_id: String, reason: String },
    /// Cancel a pending request as its holder
    Cancel {
        withdrawal_id: String,
        account_id: String,
    },
    /// Confirm the payout
    Complete {
        withdrawal_id: String,
        external_transaction_id: String,
    },
    /// Record a failed payout
    Fail { withdrawal_id: String, reason: String },
    /// Retry a failed payout
    Retry { withdrawal_id: String },
    /// Release the reservation of a failed payout
    Release { withdrawal_id: String },
    /// Cancel stale pending requests, when expiry is configured
    Expire,
    /// List requests
    List {
        #[arg(long, short)]
        status: Option<WithdrawalStatus>,
    },
}

#[derive(Subcommand)]
pub enum AdAction {
    /// Credit one priced ad event
    Credit {
        event_id: String,
        account_id: String,
        ad_id: String,
        amount: Decimal,
        /// click, impression or conversion
        #[arg(long, short, default_value = "click")]
        kind: cashledger_business::AdEventKind,
    },
}

#[derive(Subcommand)]
pub enum AdminAction {
    /// List entries
    Entries {
        #[arg(long)]
        account: Option<String>,
        #[arg(long, short = 't')]
        r#type: Option<EntryType>,
        #[arg(long, short)]
        status: Option<EntryStatus>,
        #[arg(long)]
        min_risk: Option<u8>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Entries awaiting risk review
    HighRisk {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Reverse an entry
    Reverse { entry_id: String, reason: String },
    /// Tag an entry with a fraud flag
    Flag { entry_id: String, tag: String },
    /// Signed manual adjustment
    Adjust {
        account_id: String,
        #[arg(allow_negative_numbers = true)]
        amount: Decimal,
        reason: String,
    },
    /// Check accounts against their entry log
    Reconcile {
        /// Single account; all accounts when omitted
        account_id: Option<String>,
        /// Record and reverse any unexplained difference
        #[arg(long)]
        repair: bool,
    },
    /// Platform statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Some(parent) = cli.db.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    match cli.command {
        Commands::Init { force } => {
            db::init_database(&cli.db, force).await?;
            println!("✅ Database initialized at {:?}", cli.db);
        }

        Commands::Status => {
            db::show_status(&cli.db).await?;
        }

        Commands::Account { action } => {
            let ctx = commands::context(&cli.db, cli.config.as_deref()).await?;
            account::handle(&ctx, &cli.operator, action).await?;
        }

        Commands::Credit {
            account_id,
            amount,
            r#type,
            description,
        } => {
            let ctx = commands::context(&cli.db, cli.config.as_deref()).await?;
            ledger::credit(&ctx, &account_id, amount, r#type, description, &cli.operator).await?;
        }

        Commands::Debit {
            account_id,
            amount,
            r#type,
            description,
        } => {
            let ctx = commands::context(&cli.db, cli.config.as_deref()).await?;
            ledger::debit(&ctx, &account_id, amount, r#type, description, &cli.operator).await?;
        }

        Commands::Order { action } => {
            let ctx = commands::context(&cli.db, cli.config.as_deref()).await?;
            order::handle(&ctx, action).await?;
        }

        Commands::Withdraw { action } => {
            let ctx = commands::context(&cli.db, cli.config.as_deref()).await?;
            withdraw::handle(&ctx, &cli.operator, action).await?;
        }

        Commands::Ad { action } => {
            let ctx = commands::context(&cli.db, cli.config.as_deref()).await?;
            ledger::ad(&ctx, action).await?;
        }

        Commands::Admin { action } => {
            let ctx = commands::context(&cli.db, cli.config.as_deref()).await?;
            admin::handle(&ctx, &cli.operator, action).await?;
        }
    }

    Ok(())
}
