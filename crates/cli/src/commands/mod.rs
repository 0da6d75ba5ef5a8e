//! CLI command implementations.

pub mod check_db;
pub mod migrate;
pub mod user;

use millikit_storefront::config::{self, ConfigError};
use millikit_storefront::db::{ConnectionMode, Connector, PgConnector};
use sqlx::PgPool;

/// Errors shared by commands that talk to the database directly.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Connection settings are missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Connect a standard-mode pool using the configured database URL.
async fn connect() -> Result<PgPool, DatabaseError> {
    let database_url = config::database_url_from_env()?;
    tracing::info!(
        url = %config::redact_database_url(&database_url),
        "Connecting to database..."
    );
    let connector = PgConnector::from_url(&database_url)?;
    Ok(connector.connect(ConnectionMode::Standard).await?)
}
