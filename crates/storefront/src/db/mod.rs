//! Storage engines for the storefront.
//!
//! # Tables
//!
//! - `users` - Site authentication, optional OTP
//! - `products` - Catalog, with reviews embedded as a JSON text column
//! - `cart_items` - Cart rows keyed by session id
//! - `contacts` - Contact form submissions
//!
//! # Engines
//!
//! - [`ResilientStorage`] - `PostgreSQL`, with reconnect-and-retry on
//!   transient connection failures
//! - [`MemoryStorage`] - in-process, for local development and tests
//!
//! Both implement [`Storage`], which is what the rest of the application
//! holds (as `Arc<dyn Storage>`).
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p millikit-cli -- migrate
//! ```

pub mod connection;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod reviews;
pub mod storage;

pub use connection::{ConnectionManager, ConnectionMode, Connector, ExecuteError, PgConnector};
pub use memory::MemoryStorage;
pub use postgres::ResilientStorage;
pub use retry::{ErrorKind, RetryPolicy};
pub use storage::Storage;

use thiserror::Error;

/// Errors returned by [`Storage`] operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Non-transient database failure, passed through unchanged.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Transient failures outlasted the retry budget.
    #[error("database error after {retries} retries: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: sqlx::Error,
    },

    /// Unique or foreign key constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data could not be converted into a domain type.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unique constraint");
                return Self::Conflict(format!("{constraint} already exists"));
            }
            if db_err.is_foreign_key_violation() {
                let constraint = db_err.constraint().unwrap_or("foreign key");
                return Self::Conflict(format!("{constraint} references a missing row"));
            }
        }
        Self::Database(err)
    }
}

impl From<ExecuteError<sqlx::Error>> for StorageError {
    fn from(err: ExecuteError<sqlx::Error>) -> Self {
        match err {
            ExecuteError::Exhausted { retries, source } => Self::RetriesExhausted { retries, source },
            ExecuteError::Failed(source) => source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_names_budget() {
        let err = StorageError::from(ExecuteError::Exhausted {
            retries: 5,
            source: sqlx::Error::PoolTimedOut,
        });
        assert!(matches!(err, StorageError::RetriesExhausted { retries: 5, .. }));
        assert!(err.to_string().starts_with("database error after 5 retries: "));
    }

    #[test]
    fn test_failed_passes_through() {
        let err = StorageError::from(ExecuteError::Failed(sqlx::Error::RowNotFound));
        assert!(matches!(err, StorageError::Database(sqlx::Error::RowNotFound)));
    }
}
