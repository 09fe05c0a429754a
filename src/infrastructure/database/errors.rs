use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("DateTime parse error: {0}")]
    DateTimeParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<DatabaseError> for crate::domain::errors::DomainError {
    fn from(err: DatabaseError) -> Self {
        crate::domain::errors::DomainError::DatabaseError(err.to_string())
    }
}
