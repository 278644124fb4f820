//! Risk configuration errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("Invalid hour {0} (must be 0-23)")]
    InvalidHour(u32),

    #[error("Invalid UTC offset: {0} minutes")]
    InvalidUtcOffset(i32),

    #[error("Invalid threshold {0} (must be 0-100)")]
    InvalidThreshold(u8),
}
