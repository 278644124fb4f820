//! Service layer errors

use cashledger_core::CoreError;
use cashledger_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// An invariant or state machine rule blocked the operation
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The request itself is malformed for this operation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Persistence(PersistenceError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<PersistenceError> for ServiceError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound { entity, id } => Self::NotFound { entity, id },
            PersistenceError::UniqueViolation(msg) => Self::Core(CoreError::DuplicateEntry(msg)),
            other => Self::Persistence(other),
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::from(err).into()
    }
}

impl ServiceError {
    /// The underlying core error, if the failure was a ledger rule
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            Self::Core(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Core(CoreError::DuplicateEntry(_)))
    }

    /// Failures caused by infrastructure rather than ledger rules
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_becomes_duplicate_entry() {
        let err: ServiceError = PersistenceError::UniqueViolation("idempotency_key".into()).into();
        assert!(err.is_duplicate());
    }

    #[test]
    fn test_not_found_is_lifted() {
        let err: ServiceError = PersistenceError::not_found("Account", "a-1").into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Account not found: a-1");
    }
}
