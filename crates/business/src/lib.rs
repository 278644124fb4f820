//! # CashLedger Business
//!
//! Service layer - every ledger operation as one atomic unit of work.
//!
//! - [`LedgerService`] - postings, PIN, account administration, reversals, reconciliation
//! - [`SettlementService`] - order cashback from tracking to credit
//! - [`WithdrawalService`] - reserve, review, payout, retry
//! - [`EarningsService`] - idempotent ad revenue credits
//! - [`AdminService`] - review queue, corrections, statistics

pub mod admin;
pub mod config;
pub mod earnings;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod services;
pub mod settlement;
pub mod withdrawal;

pub use admin::{AdminService, LedgerStats};
pub use config::LedgerConfig;
pub use earnings::{AdEarning, AdEventKind, EarningsService};
pub use error::{ServiceError, ServiceResult};
pub use ledger::{LedgerService, Posting, ReconcileOutcome};
pub use notify::{LogNotifier, Notification, Notifier, NotifyError, RecordingNotifier};
pub use services::{AccountLocks, Clock, ManualClock, ServiceContext, SystemClock};
pub use settlement::{SettlementReport, SettlementService};
pub use withdrawal::{WithdrawalService, WithdrawalStep};
