//! # CashLedger Core
//!
//! Domain types for the cashback ledger:
//! - [`LedgerAccount`] - per-user balance aggregate, the only place balance invariants are enforced
//! - [`OrderCashback`] - settlement state machine for purchase cashback
//! - [`WithdrawalRequest`] - two-phase reserve/commit withdrawal workflow
//! - [`CashbackPolicy`] - cashback rate computed at order time
//! - [`CoreError`] - error taxonomy shared by every layer above

pub mod account;
pub mod error;
pub mod order;
pub mod pin;
pub mod policy;
pub mod withdrawal;

pub use account::{
    AccountState, AccountSummary, BalanceChange, LedgerAccount, PinPolicy, VerificationStatus,
};
pub use error::{CoreError, CoreResult};
pub use order::{CashbackStatus, OrderCashback, OrderStatus, DEFAULT_RETURN_PERIOD_DAYS};
pub use pin::PinHash;
pub use policy::{CashbackPolicy, CashbackTier};
pub use withdrawal::{WithdrawalMethod, WithdrawalRequest, WithdrawalStatus};
