//! Ledger configuration
//!
//! Every threshold is configurable via a JSON file; a partial file is
//! completed from the defaults below.

use crate::error::{ServiceError, ServiceResult};
use cashledger_core::{CashbackPolicy, PinPolicy, DEFAULT_RETURN_PERIOD_DAYS};
use cashledger_ledger::MAX_RETRIES;
use cashledger_risk::RiskConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    // === Accounts ===
    /// The single currency every account holds
    #[serde(default = "default_currency")]
    pub currency: String,

    /// `minimum_withdrawal` given to new accounts
    #[serde(default = "default_minimum_withdrawal")]
    pub default_minimum_withdrawal: Decimal,

    // === PIN ===
    #[serde(default = "default_pin_max_attempts")]
    pub pin_max_attempts: u32,

    #[serde(default = "default_pin_lockout_minutes")]
    pub pin_lockout_minutes: i64,

    // === Entries ===
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    // === Settlement ===
    /// Cooling period after delivery before cashback may be credited
    #[serde(default = "default_return_period_days")]
    pub return_period_days: i64,

    #[serde(default)]
    pub cashback: CashbackPolicy,

    // === Withdrawals ===
    /// Require verification status `approved` before a withdrawal request
    #[serde(default = "default_true")]
    pub require_verification_for_withdrawal: bool,

    /// Cancel pending withdrawals older than this many hours; `None` disables expiry
    #[serde(default)]
    pub stale_withdrawal_expiry_hours: Option<u64>,

    // === Risk ===
    #[serde(default)]
    pub risk: RiskConfig,
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_minimum_withdrawal() -> Decimal {
    Decimal::new(100, 0)
}

fn default_pin_max_attempts() -> u32 {
    3
}

fn default_pin_lockout_minutes() -> i64 {
    30
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_return_period_days() -> i64 {
    DEFAULT_RETURN_PERIOD_DAYS
}

fn default_true() -> bool {
    true
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            default_minimum_withdrawal: default_minimum_withdrawal(),
            pin_max_attempts: default_pin_max_attempts(),
            pin_lockout_minutes: default_pin_lockout_minutes(),
            max_retries: default_max_retries(),
            return_period_days: default_return_period_days(),
            cashback: CashbackPolicy::default(),
            require_verification_for_withdrawal: true,
            stale_withdrawal_expiry_hours: None,
            risk: RiskConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> ServiceResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ServiceError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.default_minimum_withdrawal <= Decimal::ZERO {
            return Err(ServiceError::Config(
                "default_minimum_withdrawal must be positive".to_string(),
            ));
        }
        if self.pin_max_attempts == 0 {
            return Err(ServiceError::Config(
                "pin_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.return_period_days < 0 || self.pin_lockout_minutes < 0 {
            return Err(ServiceError::Config(
                "durations must not be negative".to_string(),
            ));
        }
        if self.cashback.max_percent <= Decimal::ZERO {
            return Err(ServiceError::Config(
                "cashback.max_percent must be positive".to_string(),
            ));
        }
        self.risk
            .validate()
            .map_err(|e| ServiceError::Config(e.to_string()))
    }

    pub fn pin_policy(&self) -> PinPolicy {
        PinPolicy {
            max_attempts: self.pin_max_attempts,
            lockout: chrono::Duration::minutes(self.pin_lockout_minutes),
        }
    }

    pub fn return_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.return_period_days)
    }

    pub fn stale_withdrawal_expiry(&self) -> Option<chrono::Duration> {
        self.stale_withdrawal_expiry_hours
            .map(|hours| chrono::Duration::hours(hours as i64))
    }
}
