//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::{ConfigError, StorageBackend, StorefrontConfig};
use crate::db::{MemoryStorage, ResilientStorage, Storage, StorageError};
use crate::services::auth::{AuthService, OtpVerifier, TotpVerifier};

/// Error building application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the storage engine and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    storage: Arc<dyn Storage>,
}

impl AppState {
    /// Create application state around an existing storage engine.
    #[must_use]
    pub fn new(config: StorefrontConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, storage }),
        }
    }

    /// Open the configured storage engine and build the state.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Config` if the `PostgreSQL` backend is selected
    /// without a database URL, and `StateError::Storage` if the initial
    /// connection fails.
    pub async fn connect(config: StorefrontConfig) -> Result<Self, StateError> {
        let storage = open_storage(&config).await?;
        Ok(Self::new(config, storage))
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the storage engine.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    /// Authentication service over this state's storage.
    #[must_use]
    pub fn auth(&self) -> AuthService<'_> {
        AuthService::new(self.inner.storage.as_ref())
    }
}

/// Build the storage engine selected by `config`.
///
/// # Errors
///
/// Returns `StateError::Config` if the `PostgreSQL` backend is selected
/// without a database URL, and `StateError::Storage` if the initial
/// connection fails.
pub async fn open_storage(config: &StorefrontConfig) -> Result<Arc<dyn Storage>, StateError> {
    let otp: Arc<dyn OtpVerifier> = Arc::new(TotpVerifier::default());

    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(MemoryStorage::new(otp)))
        }
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_ref()
                .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
            let storage =
                ResilientStorage::connect(database_url, config.connection_mode, config.retry, otp)
                    .await?;
            Ok(Arc::new(storage))
        }
    }
}
