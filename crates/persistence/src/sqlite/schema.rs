//! Row types for sqlx mapping from SQLite tables
//!
//! Schema lives in `migrations/20261016000000_init.sql`. Decimals are stored
//! as TEXT so no precision is lost; enums as their lowercase / kebab-case names.

use crate::error::{PersistenceError, PersistenceResult};
use cashledger_core::{
    AccountState, LedgerAccount, OrderCashback, PinHash, WithdrawalRequest,
};
use cashledger_ledger::LedgerEntry;
use cashledger_risk::RiskScore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

pub(crate) fn parse_decimal(field: &str, value: &str) -> PersistenceResult<Decimal> {
    Decimal::from_str(value).map_err(|_| PersistenceError::InvalidDecimal {
        field: field.to_string(),
        value: value.to_string(),
    })
}

pub(crate) fn parse_enum<T: FromStr>(field: &str, value: &str) -> PersistenceResult<T> {
    value.parse().map_err(|_| PersistenceError::InvalidEnumValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Row type for the `accounts` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct AccountRow {
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub balance: String,
    pub pending_cashback: String,
    pub pending_withdrawals: String,
    pub total_earned: String,
    pub total_withdrawn: String,
    pub total_spent: String,
    pub opening_balance: String,
    pub is_frozen: bool,
    pub freeze_reason: Option<String>,
    pub verification: String,
    pub minimum_withdrawal: String,
    pub pin_hash: Option<String>,
    pub pin_salt: Option<String>,
    pub pin_attempts: i64,
    pub pin_locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for LedgerAccount {
    type Error = PersistenceError;

    fn try_from(row: AccountRow) -> PersistenceResult<Self> {
        let pin = match (row.pin_hash, row.pin_salt) {
            (Some(hash), Some(salt)) => Some(PinHash { hash, salt }),
            _ => None,
        };
        let state = AccountState {
            balance: parse_decimal("balance", &row.balance)?,
            pending_cashback: parse_decimal("pending_cashback", &row.pending_cashback)?,
            pending_withdrawals: parse_decimal("pending_withdrawals", &row.pending_withdrawals)?,
            total_earned: parse_decimal("total_earned", &row.total_earned)?,
            total_withdrawn: parse_decimal("total_withdrawn", &row.total_withdrawn)?,
            total_spent: parse_decimal("total_spent", &row.total_spent)?,
            opening_balance: parse_decimal("opening_balance", &row.opening_balance)?,
            minimum_withdrawal: parse_decimal("minimum_withdrawal", &row.minimum_withdrawal)?,
            verification: parse_enum("verification", &row.verification)?,
            pin_attempts: u32::try_from(row.pin_attempts).unwrap_or(u32::MAX),
            id: row.id.clone(),
            user_id: row.user_id,
            currency: row.currency,
            is_frozen: row.is_frozen,
            freeze_reason: row.freeze_reason,
            pin,
            pin_locked_until: row.pin_locked_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        LedgerAccount::restore(state).map_err(|e| PersistenceError::CorruptRecord {
            entity: "Account".to_string(),
            id: row.id,
            message: e.to_string(),
        })
    }
}

/// Row type for the `ledger_entries` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct EntryRow {
    pub id: String,
    pub account_id: String,
    pub entry_type: String,
    pub amount: String,
    pub balance_before: String,
    pub balance_after: String,
    pub status: String,
    pub related_order_id: Option<String>,
    pub related_ad_id: Option<String>,
    pub risk_score: i64,
    /// JSON array of tags
    pub fraud_flags: String,
    pub retry_count: i64,
    pub description: Option<String>,
    pub failure_reason: Option<String>,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub original_entry_id: Option<String>,
    pub reversal_entry_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = PersistenceError;

    fn try_from(row: EntryRow) -> PersistenceResult<Self> {
        let fraud_flags: BTreeSet<String> =
            serde_json::from_str(&row.fraud_flags).map_err(|e| PersistenceError::InvalidJson {
                field: "fraud_flags".to_string(),
                message: e.to_string(),
            })?;
        Ok(LedgerEntry {
            entry_type: parse_enum("entry_type", &row.entry_type)?,
            amount: parse_decimal("amount", &row.amount)?,
            balance_before: parse_decimal("balance_before", &row.balance_before)?,
            balance_after: parse_decimal("balance_after", &row.balance_after)?,
            status: parse_enum("status", &row.status)?,
            risk_score: RiskScore::new(row.risk_score.clamp(0, 100) as u32),
            retry_count: u32::try_from(row.retry_count).unwrap_or(u32::MAX),
            fraud_flags,
            id: row.id,
            account_id: row.account_id,
            related_order_id: row.related_order_id,
            related_ad_id: row.related_ad_id,
            description: row.description,
            failure_reason: row.failure_reason,
            processed_by: row.processed_by,
            processed_at: row.processed_at,
            original_entry_id: row.original_entry_id,
            reversal_entry_id: row.reversal_entry_id,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        })
    }
}

/// Row type for the `order_cashbacks` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct OrderRow {
    pub order_id: String,
    pub account_id: String,
    pub order_amount: String,
    pub cashback_percent: String,
    pub cashback_amount: String,
    pub order_status: String,
    pub cashback_status: String,
    pub delivery_date: Option<DateTime<Utc>>,
    pub return_period_ends: Option<DateTime<Utc>>,
    pub earned_entry_id: Option<String>,
    pub credited_entry_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for OrderCashback {
    type Error = PersistenceError;

    fn try_from(row: OrderRow) -> PersistenceResult<Self> {
        Ok(OrderCashback {
            order_amount: parse_decimal("order_amount", &row.order_amount)?,
            cashback_percent: parse_decimal("cashback_percent", &row.cashback_percent)?,
            cashback_amount: parse_decimal("cashback_amount", &row.cashback_amount)?,
            order_status: parse_enum("order_status", &row.order_status)?,
            cashback_status: parse_enum("cashback_status", &row.cashback_status)?,
            order_id: row.order_id,
            account_id: row.account_id,
            delivery_date: row.delivery_date,
            return_period_ends: row.return_period_ends,
            earned_entry_id: row.earned_entry_id,
            credited_entry_id: row.credited_entry_id,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for the `withdrawals` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct WithdrawalRow {
    pub id: String,
    pub account_id: String,
    pub entry_id: String,
    pub amount: String,
    pub method: String,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub external_transaction_id: Option<String>,
    pub reviewed_by: Option<String>,
    pub review_reason: Option<String>,
    pub reservation_released: bool,
}

impl TryFrom<WithdrawalRow> for WithdrawalRequest {
    type Error = PersistenceError;

    fn try_from(row: WithdrawalRow) -> PersistenceResult<Self> {
        Ok(WithdrawalRequest {
            amount: parse_decimal("amount", &row.amount)?,
            method: parse_enum("method", &row.method)?,
            status: parse_enum("status", &row.status)?,
            id: row.id,
            account_id: row.account_id,
            entry_id: row.entry_id,
            requested_at: row.requested_at,
            processed_at: row.processed_at,
            external_transaction_id: row.external_transaction_id,
            reviewed_by: row.reviewed_by,
            review_reason: row.review_reason,
            reservation_released: row.reservation_released,
        })
    }
}
