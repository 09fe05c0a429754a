//! Domain errors for the optimization engine.

use thiserror::Error;

/// Domain-level errors.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(i64),

    #[error("Arm not found: {0}")]
    ArmNotFound(i64),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Duplicate arm key '{key}' in campaign {campaign_id}")]
    DuplicateArmKey { campaign_id: i64, key: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Budget invariant breached: spent {spent:.2} exceeds budget {budget:.2}")]
    BudgetBreached { spent: f64, budget: f64 },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
