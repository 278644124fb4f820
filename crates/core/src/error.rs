//! Core error taxonomy
//!
//! Every variant names the invariant that blocked the operation. All of them
//! are raised before any field of the aggregate is touched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the ledger account and the settlement / withdrawal state machines
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // === Amount validation ===
    #[error("Invalid amount: {0} (must be greater than zero)")]
    InvalidAmount(Decimal),

    // === Balance invariants ===
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Insufficient pending cashback: pending {pending}, requested {requested}")]
    InsufficientPending { pending: Decimal, requested: Decimal },

    #[error("Insufficient reserved funds: reserved {reserved}, requested {requested}")]
    InsufficientReserved {
        reserved: Decimal,
        requested: Decimal,
    },

    #[error("Below minimum withdrawal: minimum {minimum}, requested {requested}")]
    BelowMinimumWithdrawal { minimum: Decimal, requested: Decimal },

    // === Account state ===
    #[error("Account frozen: {reason}")]
    AccountFrozen { reason: String },

    #[error("Account verification status is {status}, withdrawals require approved")]
    NotVerified { status: String },

    // === State machines ===
    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Retry limit exceeded: {attempts} of {max} retries used")]
    RetryLimitExceeded { attempts: u32, max: u32 },

    #[error("Cashback not eligible for crediting: {0}")]
    CashbackNotEligible(String),

    #[error("Invalid delivery date: {0}")]
    InvalidDeliveryDate(String),

    // === PIN ===
    #[error("PIN locked until {until}")]
    PinLocked { until: DateTime<Utc> },

    #[error("Incorrect PIN: {remaining_attempts} attempt(s) remaining")]
    InvalidPin { remaining_attempts: u32 },

    #[error("PIN not set for this account")]
    PinNotSet,

    #[error("PIN must be 4 to 6 digits")]
    InvalidPinFormat,

    // === Log ===
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Balance snapshot mismatch on entry {entry_id}: {before} -> {after} does not move by {amount}")]
    SnapshotMismatch {
        entry_id: String,
        before: Decimal,
        after: Decimal,
        amount: Decimal,
    },
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Shorthand for an invalid state transition
    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Balance / pool invariant violations
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. }
                | Self::InsufficientPending { .. }
                | Self::InsufficientReserved { .. }
        )
    }

    /// Errors caused by bad caller input rather than account state
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_) | Self::BelowMinimumWithdrawal { .. } | Self::InvalidPinFormat
        )
    }

    /// PIN related failures
    pub fn is_pin_error(&self) -> bool {
        matches!(
            self,
            Self::PinLocked { .. } | Self::InvalidPin { .. } | Self::PinNotSet | Self::InvalidPinFormat
        )
    }
}
