//! Risk scorer
//!
//! Deterministic function over an entry's amount and creation time. It never
//! blocks an operation; it only annotates entries so high scorers surface in
//! the admin review queue.

use crate::config::RiskConfig;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suspicion score clamped to `0..=100`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskScore(u8);

impl RiskScore {
    pub const MAX: u8 = 100;

    pub fn new(value: u32) -> Self {
        Self(value.min(Self::MAX as u32) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Raise by `points`, saturating at 100
    pub fn raised(self, points: u8) -> Self {
        Self::new(self.0 as u32 + points as u32)
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A rule that contributed to a score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum RiskFactor {
    LargeAmount { above: Decimal, points: u8 },
    OffHours { hour: u32, points: u8 },
    Weekend { weekday: String, points: u8 },
}

impl RiskFactor {
    pub fn points(&self) -> u8 {
        match self {
            RiskFactor::LargeAmount { points, .. }
            | RiskFactor::OffHours { points, .. }
            | RiskFactor::Weekend { points, .. } => *points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: RiskScore,
    pub factors: Vec<RiskFactor>,
}

#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: RiskConfig,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Score an entry of `amount` (sign ignored) created at `at`
    pub fn assess(&self, amount: Decimal, at: DateTime<Utc>) -> RiskAssessment {
        let mut factors = Vec::new();
        let amount = amount.abs();

        if let Some(tier) = self
            .config
            .amount_tiers
            .iter()
            .filter(|tier| amount > tier.above)
            .max_by_key(|tier| tier.above)
        {
            factors.push(RiskFactor::LargeAmount {
                above: tier.above,
                points: tier.points,
            });
        }

        // An unrepresentable offset falls back to UTC; RiskConfig::validate rejects it up front
        let (hour, weekday) = match self.config.local_offset() {
            Ok(offset) => {
                let local = at.with_timezone(&offset);
                (local.hour(), local.weekday())
            }
            Err(_) => (at.hour(), at.weekday()),
        };

        if self.config.is_off_hours(hour) {
            factors.push(RiskFactor::OffHours {
                hour,
                points: self.config.off_hours_points,
            });
        }
        if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            factors.push(RiskFactor::Weekend {
                weekday: weekday.to_string(),
                points: self.config.weekend_points,
            });
        }

        let total: u32 = factors.iter().map(|f| f.points() as u32).sum();
        RiskAssessment {
            score: RiskScore::new(total),
            factors,
        }
    }

    pub fn score(&self, amount: Decimal, at: DateTime<Utc>) -> RiskScore {
        self.assess(amount, at).score
    }

    pub fn is_high_risk(&self, score: RiskScore) -> bool {
        score.value() >= self.config.high_risk_threshold
    }

    /// Score after one more distinct fraud flag
    pub fn flagged(&self, score: RiskScore) -> RiskScore {
        score.raised(self.config.fraud_flag_increment)
    }
}
