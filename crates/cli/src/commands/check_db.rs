//! Database diagnostics.
//!
//! Reports which connection variables are present, the (redacted)
//! connection string, the server time and whether the catalog table exists.
//!
//! # Usage
//!
//! ```bash
//! mk-cli check-db
//! ```

use chrono::{DateTime, Utc};
use millikit_storefront::config::{self, PG_VARS};

use super::DatabaseError;

/// Run the database check.
///
/// # Errors
///
/// Returns `DatabaseError` if no connection string can be assembled or the
/// database cannot be queried.
#[allow(clippy::print_stdout)]
pub async fn run() -> Result<(), DatabaseError> {
    let _ = dotenvy::dotenv();

    println!("Database environment:");
    for key in std::iter::once("DATABASE_URL").chain(PG_VARS) {
        println!("  {key} exists: {}", std::env::var_os(key).is_some());
    }

    let database_url = config::database_url_from_env()?;
    println!(
        "Connection string: {}",
        config::redact_database_url(&database_url)
    );

    let pool = super::connect().await?;

    let now: DateTime<Utc> = sqlx::query_scalar("SELECT NOW()").fetch_one(&pool).await?;
    println!("Connected. Server time: {now}");

    let has_products: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = 'products')",
    )
    .fetch_one(&pool)
    .await?;

    if has_products {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&pool)
            .await?;
        println!("products table exists with {count} rows");
    } else {
        println!("products table does not exist; run `mk-cli migrate`");
    }

    pool.close().await;
    Ok(())
}
