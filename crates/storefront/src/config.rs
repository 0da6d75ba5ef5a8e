//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Database (required unless `MILLIKIT_STORAGE=memory`)
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD`, `PGDATABASE` - Discrete
//!   connection settings; used instead of `DATABASE_URL` when all five are set
//!
//! ## Optional
//! - `MILLIKIT_ENV` - `development` (default) or `production`; production
//!   requires TLS to the database
//! - `MILLIKIT_STORAGE` - `postgres` (default) or `memory`
//! - `MILLIKIT_DB_MODE` - `constrained` or `standard`; defaults to
//!   `constrained` on serverless platforms (`VERCEL`, `AWS_LAMBDA_FUNCTION_NAME`)
//!   and in production
//! - `MILLIKIT_DB_MAX_RETRIES` - Reconnect attempts per operation (default: 5)
//! - `MILLIKIT_DB_RETRY_DELAY_MS` - Base retry delay (default: 2000)
//! - `MILLIKIT_HOST` - Bind address (default: 127.0.0.1)
//! - `MILLIKIT_PORT` - Listen port (default: 3000)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::db::{ConnectionMode, RetryPolicy};

/// Discrete connection variables, in URL order.
pub const PG_VARS: [&str; 5] = ["PGHOST", "PGPORT", "PGUSER", "PGPASSWORD", "PGDATABASE"];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "unknown environment '{other}' (expected 'development' or 'production')"
            )),
        }
    }
}

/// Which storage engine to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown storage backend '{other}' (expected 'postgres' or 'memory')"
            )),
        }
    }
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Storage engine
    pub storage: StorageBackend,
    /// `PostgreSQL` connection URL (contains password); `None` only with the
    /// memory backend
    pub database_url: Option<SecretString>,
    /// Connection tuning, fixed for the process lifetime
    pub connection_mode: ConnectionMode,
    /// Reconnect-and-retry policy
    pub retry: RetryPolicy,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = parse_or_default(&lookup, "MILLIKIT_ENV", Environment::Development)?;
        let storage = parse_or_default(&lookup, "MILLIKIT_STORAGE", StorageBackend::Postgres)?;

        let database_url = match database_url_from_lookup(&lookup, environment) {
            Ok(url) => Some(url),
            Err(_) if storage == StorageBackend::Memory => None,
            Err(e) => return Err(e),
        };

        let default_mode = if is_serverless(&lookup, environment) {
            ConnectionMode::Constrained
        } else {
            ConnectionMode::Standard
        };
        let connection_mode = parse_or_default(&lookup, "MILLIKIT_DB_MODE", default_mode)?;

        let retry = RetryPolicy {
            max_retries: parse_or_default(
                &lookup,
                "MILLIKIT_DB_MAX_RETRIES",
                RetryPolicy::DEFAULT_MAX_RETRIES,
            )?,
            base_delay: Duration::from_millis(parse_or_default(
                &lookup,
                "MILLIKIT_DB_RETRY_DELAY_MS",
                u64::try_from(RetryPolicy::DEFAULT_BASE_DELAY.as_millis()).unwrap_or(u64::MAX),
            )?),
            ..RetryPolicy::default()
        };

        let host = parse_or_default(&lookup, "MILLIKIT_HOST", IpAddr::from([127, 0, 0, 1]))?;
        let port = parse_or_default(&lookup, "MILLIKIT_PORT", 3000_u16)?;
        let sentry_dsn = lookup("SENTRY_DSN").filter(|dsn| !dsn.trim().is_empty());

        Ok(Self {
            environment,
            storage,
            database_url,
            connection_mode,
            retry,
            host,
            port,
            sentry_dsn,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Resolve the database URL from the environment.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if neither `DATABASE_URL` nor all
/// five `PG*` variables are set.
pub fn database_url_from_env() -> Result<SecretString, ConfigError> {
    let _ = dotenvy::dotenv();
    let lookup = |key: &str| std::env::var(key).ok();
    let environment = parse_or_default(&lookup, "MILLIKIT_ENV", Environment::Development)?;
    database_url_from_lookup(&lookup, environment)
}

/// Resolve the database URL, preferring the discrete `PG*` variables.
///
/// In production `sslmode=require` is added unless the URL already names
/// an `sslmode`.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if no URL can be assembled and
/// `ConfigError::InvalidEnvVar` if the parts do not form a valid URL.
pub fn database_url_from_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    environment: Environment,
) -> Result<SecretString, ConfigError> {
    let parts: Vec<String> = PG_VARS.iter().filter_map(|key| non_blank(lookup, key)).collect();

    let mut url = if let [host, port, user, password, database] = parts.as_slice() {
        let mut url = Url::parse(&format!("postgres://{host}:{port}/{database}"))
            .map_err(|e| ConfigError::InvalidEnvVar("PGHOST".to_string(), e.to_string()))?;
        url.set_username(user)
            .and_then(|()| url.set_password(Some(password)))
            .map_err(|()| {
                ConfigError::InvalidEnvVar("PGUSER".to_string(), "cannot set credentials".into())
            })?;
        url.to_string()
    } else {
        non_blank(lookup, "DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
    };

    if environment.is_production() && !url.contains("sslmode=") {
        url.push_str(if url.contains('?') {
            "&sslmode=require"
        } else {
            "?sslmode=require"
        });
    }

    Ok(SecretString::from(url))
}

/// Connection string with the password masked, for logs and diagnostics.
#[must_use]
pub fn redact_database_url(database_url: &SecretString) -> String {
    match Url::parse(database_url.expose_secret()) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => "[unparseable database url]".to_string(),
    }
}

/// Whether the process runs on a short-lived serverless platform.
fn is_serverless(lookup: &impl Fn(&str) -> Option<String>, environment: Environment) -> bool {
    environment.is_production()
        || non_blank(lookup, "VERCEL").is_some()
        || non_blank(lookup, "AWS_LAMBDA_FUNCTION_NAME").is_some()
}

/// A variable's value, treating empty and whitespace-only values as unset.
fn non_blank(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

/// Parse a variable, falling back to `default` when it is unset or blank.
fn parse_or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_blank(lookup, key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
