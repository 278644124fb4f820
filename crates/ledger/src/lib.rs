//! # CashLedger Ledger
//!
//! Append-only log of every balance change:
//! - [`LedgerEntry`] with a small status machine, fraud flags, bounded retry
//!   and reversal by compensating entry
//! - [`EntryFilter`] for admin listing and the high-risk queue
//! - [`reconcile`] and [`LifetimeTotals`] to check an account against its log

pub mod entry;
pub mod filter;
pub mod reconcile;

pub use entry::{EntryStatus, EntryType, LedgerEntry, MAX_RETRIES, RECONCILIATION_REPAIR};
pub use filter::EntryFilter;
pub use reconcile::{reconcile, LifetimeTotals, Reconciliation};
