//! Error types for the backoffice core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl Error {
    /// Whether the error comes from an unreachable backing service
    /// (database or cache) rather than bad input.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Redis(_) | Error::Cache { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
