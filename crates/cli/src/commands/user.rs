//! User management commands.
//!
//! # Usage
//!
//! ```bash
//! mk-cli user create -u miller -p 'correct horse battery'
//! mk-cli user create -u admin -p 'correct horse battery' --admin
//! ```
//!
//! Users are created through the configured storage engine, so the same
//! environment as the server applies (`DATABASE_URL` etc.).

use millikit_storefront::config::{ConfigError, StorefrontConfig};
use millikit_storefront::services::auth::{AuthError, AuthService};
use millikit_storefront::state::{StateError, open_storage};
use thiserror::Error;

/// Errors that can occur during user operations.
#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Create a new user.
///
/// # Returns
///
/// The ID of the created user.
///
/// # Errors
///
/// Returns `UserError` if the storage engine cannot be opened or the
/// username/password are rejected.
pub async fn create(username: &str, password: &str, admin: bool) -> Result<i32, UserError> {
    let config = StorefrontConfig::from_env()?;
    let storage = open_storage(&config).await?;

    let user = AuthService::new(storage.as_ref())
        .register(username, password, admin)
        .await?;

    tracing::info!(
        "User created successfully! ID: {}, Username: {}, Admin: {}",
        user.id,
        user.username,
        user.is_admin
    );

    storage.close().await;
    Ok(user.id.as_i32())
}
