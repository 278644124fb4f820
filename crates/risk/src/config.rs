//! Risk scorer configuration
//!
//! Defaults reproduce the platform's fixed rules; every field can be
//! overridden from the ledger config file.

use crate::error::RiskError;
use chrono::FixedOffset;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Points awarded when an entry's absolute amount exceeds `above`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountTier {
    pub above: Decimal,
    pub points: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    // === Amount ===
    /// Only the highest matching tier counts
    #[serde(default = "default_amount_tiers")]
    pub amount_tiers: Vec<AmountTier>,

    // === Time of day ===
    /// Off-hours window start (inclusive, local hour)
    #[serde(default = "default_off_hours_start")]
    pub off_hours_start: u32,

    /// Off-hours window end (exclusive, local hour)
    #[serde(default = "default_off_hours_end")]
    pub off_hours_end: u32,

    #[serde(default = "default_off_hours_points")]
    pub off_hours_points: u8,

    #[serde(default = "default_weekend_points")]
    pub weekend_points: u8,

    /// Local time used for the off-hours and weekend checks
    #[serde(default)]
    pub utc_offset_minutes: i32,

    // === Review ===
    /// Entries scoring at or above this land in the high-risk queue
    #[serde(default = "default_high_risk_threshold")]
    pub high_risk_threshold: u8,

    /// Score increase per distinct fraud flag
    #[serde(default = "default_fraud_flag_increment")]
    pub fraud_flag_increment: u8,
}

fn default_amount_tiers() -> Vec<AmountTier> {
    vec![
        AmountTier {
            above: Decimal::new(50_000, 0),
            points: 30,
        },
        AmountTier {
            above: Decimal::new(20_000, 0),
            points: 20,
        },
        AmountTier {
            above: Decimal::new(10_000, 0),
            points: 10,
        },
    ]
}

fn default_off_hours_start() -> u32 {
    21
}

fn default_off_hours_end() -> u32 {
    6
}

fn default_off_hours_points() -> u8 {
    15
}

fn default_weekend_points() -> u8 {
    10
}

fn default_high_risk_threshold() -> u8 {
    70
}

fn default_fraud_flag_increment() -> u8 {
    20
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            amount_tiers: default_amount_tiers(),
            off_hours_start: default_off_hours_start(),
            off_hours_end: default_off_hours_end(),
            off_hours_points: default_off_hours_points(),
            weekend_points: default_weekend_points(),
            utc_offset_minutes: 0,
            high_risk_threshold: default_high_risk_threshold(),
            fraud_flag_increment: default_fraud_flag_increment(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), RiskError> {
        for hour in [self.off_hours_start, self.off_hours_end] {
            if hour > 23 {
                return Err(RiskError::InvalidHour(hour));
            }
        }
        if self.high_risk_threshold > 100 {
            return Err(RiskError::InvalidThreshold(self.high_risk_threshold));
        }
        self.local_offset()?;
        Ok(())
    }

    pub fn local_offset(&self) -> Result<FixedOffset, RiskError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or(RiskError::InvalidUtcOffset(self.utc_offset_minutes))
    }

    /// Whether `hour` falls in the off-hours window, which may wrap midnight
    pub fn is_off_hours(&self, hour: u32) -> bool {
        if self.off_hours_start <= self.off_hours_end {
            hour >= self.off_hours_start && hour < self.off_hours_end
        } else {
            hour >= self.off_hours_start || hour < self.off_hours_end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RiskConfig::default();
        assert_eq!(config.high_risk_threshold, 70);
        assert_eq!(config.fraud_flag_increment, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_off_hours_window_wraps_midnight() {
        let config = RiskConfig::default();
        assert!(config.is_off_hours(21));
        assert!(config.is_off_hours(23));
        assert!(config.is_off_hours(0));
        assert!(config.is_off_hours(5));
        assert!(!config.is_off_hours(6));
        assert!(!config.is_off_hours(20));
    }

    #[test]
    fn test_non_wrapping_window() {
        let config = RiskConfig {
            off_hours_start: 1,
            off_hours_end: 4,
            ..RiskConfig::default()
        };
        assert!(config.is_off_hours(1));
        assert!(!config.is_off_hours(4));
        assert!(!config.is_off_hours(23));
    }

    #[test]
    fn test_invalid_config() {
        let config = RiskConfig {
            off_hours_start: 24,
            ..RiskConfig::default()
        };
        assert_eq!(config.validate(), Err(RiskError::InvalidHour(24)));

        let config = RiskConfig {
            utc_offset_minutes: 24 * 60,
            ..RiskConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: RiskConfig =
            serde_json::from_str(r#"{"high_risk_threshold": 60, "utc_offset_minutes": 330}"#)
                .unwrap();
        assert_eq!(config.high_risk_threshold, 60);
        assert_eq!(config.utc_offset_minutes, 330);
        assert_eq!(config.amount_tiers.len(), 3);
        assert_eq!(config.off_hours_start, 21);
    }
}
