//! Common error types for pawscope

use thiserror::Error;

/// Common result type for pawscope operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across pawscope crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (e.g. out-of-range grade)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when a store rejected a write because of a key or reference constraint.
    ///
    /// Primary-key/unique conflicts and foreign-key violations both count.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                db_err.is_unique_violation() || db_err.is_foreign_key_violation()
            }
            _ => false,
        }
    }
}
