//! # CashLedger Risk
//!
//! Pure scoring of ledger entries:
//! - amount tiers: +30 above 50,000, +20 above 20,000, +10 above 10,000
//! - off-hours (21:00-06:00 local): +15
//! - weekend: +10
//!
//! Scores are clamped to 0-100. Entries at or above the high-risk threshold
//! (70 by default) are surfaced for review; scoring never blocks an operation.

pub mod config;
pub mod error;
pub mod scorer;

pub use config::{AmountTier, RiskConfig};
pub use error::RiskError;
pub use scorer::{RiskAssessment, RiskFactor, RiskScore, RiskScorer};
