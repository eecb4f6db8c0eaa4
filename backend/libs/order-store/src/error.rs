//! Error types for the order store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or mutating order state.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An order with this id already exists
    #[error("order already exists: {0}")]
    Conflict(String),

    /// No order with this id
    #[error("order not found: {0}")]
    NotFound(String),

    /// Stored status text does not map to a known status
    #[error("unknown order status: {0}")]
    UnknownStatus(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Map a sqlx error to `Conflict` when it is a unique violation on the
    /// given order id.
    pub(crate) fn from_insert(err: sqlx::Error, order_id: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            // PostgreSQL unique violation error code: 23505
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Conflict(order_id.to_string());
            }
        }
        StoreError::Database(err)
    }
}
