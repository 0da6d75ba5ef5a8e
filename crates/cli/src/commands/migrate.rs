//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! mk-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`, or all of `PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD`,
//!   `PGDATABASE`
//! - `MILLIKIT_ENV` - `production` adds `sslmode=require`
//!
//! # Migration Files
//!
//! Storefront migrations: `crates/storefront/migrations/`

use super::DatabaseError;

/// Run storefront database migrations.
///
/// # Errors
///
/// Returns `DatabaseError` if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), DatabaseError> {
    let pool = super::connect().await?;

    tracing::info!("Running storefront migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    tracing::info!("Storefront migrations complete!");
    pool.close().await;
    Ok(())
}
