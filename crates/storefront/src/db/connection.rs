//! Connection lifecycle and the reconnect-and-retry loop.
//!
//! [`ConnectionManager`] owns the live connection handle for one storage
//! engine. Every operation goes through
//! [`ConnectionManager::execute_with_retry`], which hides transient
//! connection failures from callers by reconnecting and retrying under a
//! [`RetryPolicy`].
//!
//! Reconnection is single-flight: each handle carries a generation number,
//! and a caller only replaces the handle if it is still the generation the
//! caller saw fail. Concurrent callers that failed on the same generation
//! queue on the reconnect lock and then reuse the fresh handle instead of
//! each closing and reopening it.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::retry::{ErrorKind, RetryPolicy, classify_sqlx};

/// Time allowed for closing a stale pool before giving up on it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection tuning, chosen once per process from the deployment context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Short-lived execution context (serverless function, cold starts).
    Constrained,
    /// Long-lived server process.
    Standard,
}

/// Pool parameters derived from a [`ConnectionMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    /// Prepared statement caching.
    pub statement_cache: bool,
    /// Health-check pooled connections on every acquire.
    pub test_before_acquire: bool,
    /// Probe the connection before each operation.
    pub prewarm: bool,
    pub application_name: &'static str,
}

impl ConnectionMode {
    /// Pool parameters for this mode.
    #[must_use]
    pub const fn settings(self) -> PoolSettings {
        match self {
            Self::Constrained => PoolSettings {
                max_connections: 1,
                idle_timeout: Duration::from_secs(20),
                connect_timeout: Duration::from_secs(15),
                statement_cache: false,
                test_before_acquire: false,
                prewarm: true,
                application_name: "millikit-serverless",
            },
            Self::Standard => PoolSettings {
                max_connections: 10,
                idle_timeout: Duration::from_secs(30),
                connect_timeout: Duration::from_secs(10),
                statement_cache: true,
                test_before_acquire: true,
                prewarm: false,
                application_name: "millikit-standard",
            },
        }
    }

    /// Lowercase name used in configuration and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Constrained => "constrained",
            Self::Standard => "standard",
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constrained" | "serverless" => Ok(Self::Constrained),
            "standard" => Ok(Self::Standard),
            other => Err(format!(
                "unknown connection mode '{other}' (expected 'constrained' or 'standard')"
            )),
        }
    }
}

/// Opens, probes and closes connection handles for one backing store.
///
/// The retry loop is written against this trait so it can be exercised
/// without a database.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Live handle shared by concurrent operations.
    type Conn: Clone + Send + Sync + 'static;
    /// Error produced by the driver.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a fresh handle.
    async fn connect(&self, mode: ConnectionMode) -> Result<Self::Conn, Self::Error>;

    /// Run a trivial liveness query.
    async fn ping(&self, conn: &Self::Conn) -> Result<(), Self::Error>;

    /// Release a handle that is being replaced.
    async fn close(&self, conn: &Self::Conn) -> Result<(), Self::Error>;

    /// Decide whether a failure is worth a reconnect.
    fn classify(&self, err: &Self::Error) -> ErrorKind;
}

/// [`Connector`] for `PostgreSQL` through a `sqlx` pool.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    /// Parse connection options from a `postgres://` URL.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error::Configuration` if the URL is malformed.
    pub fn from_url(database_url: &SecretString) -> Result<Self, sqlx::Error> {
        let options = PgConnectOptions::from_str(database_url.expose_secret())?;
        Ok(Self { options })
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgPool;
    type Error = sqlx::Error;

    async fn connect(&self, mode: ConnectionMode) -> Result<PgPool, sqlx::Error> {
        let settings = mode.settings();
        let mut options = self
            .options
            .clone()
            .application_name(settings.application_name);
        if !settings.statement_cache {
            options = options.statement_cache_capacity(0);
        }

        PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .idle_timeout(settings.idle_timeout)
            .acquire_timeout(settings.connect_timeout)
            .test_before_acquire(settings.test_before_acquire)
            .connect_with(options)
            .await
    }

    async fn ping(&self, conn: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(conn).await.map(|_| ())
    }

    async fn close(&self, conn: &PgPool) -> Result<(), sqlx::Error> {
        tokio::time::timeout(CLOSE_TIMEOUT, conn.close())
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)
    }

    fn classify(&self, err: &sqlx::Error) -> ErrorKind {
        classify_sqlx(err)
    }
}

/// Failure of an operation run through [`ConnectionManager::execute_with_retry`].
#[derive(Debug, Error)]
pub enum ExecuteError<E: std::error::Error + 'static> {
    /// Transient failures outlasted the retry budget.
    #[error("database error after {retries} retries: {source}")]
    Exhausted {
        retries: u32,
        #[source]
        source: E,
    },

    /// Non-transient failure, returned without retrying.
    #[error(transparent)]
    Failed(E),
}

impl<E: std::error::Error + 'static> ExecuteError<E> {
    /// The underlying driver error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. } => source,
            Self::Failed(err) => err,
        }
    }
}

#[derive(Clone)]
struct Handle<T> {
    conn: T,
    generation: u64,
}

/// Owner of the live connection handle for one storage engine.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    mode: ConnectionMode,
    policy: RetryPolicy,
    current: RwLock<Handle<C::Conn>>,
    reconnect_lock: Mutex<()>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Open the initial handle.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the first connection cannot be
    /// established.
    pub async fn connect(
        connector: C,
        mode: ConnectionMode,
        policy: RetryPolicy,
    ) -> Result<Self, C::Error> {
        tracing::info!(mode = mode.as_str(), "Initializing database connection");
        let conn = connector.connect(mode).await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to initialize database connection");
        })?;
        tracing::info!(mode = mode.as_str(), "Database connection established");

        Ok(Self {
            connector,
            mode,
            policy,
            current: RwLock::new(Handle {
                conn,
                generation: 0,
            }),
            reconnect_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub const fn mode(&self) -> ConnectionMode {
        self.mode
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Number of times the handle has been replaced.
    pub async fn generation(&self) -> u64 {
        self.current.read().await.generation
    }

    /// Probe the current handle once, without retrying.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the probe fails.
    pub async fn ping(&self) -> Result<(), C::Error> {
        let handle = self.snapshot().await;
        self.connector.ping(&handle.conn).await
    }

    /// Close the current handle (used at shutdown).
    pub async fn close(&self) {
        let handle = self.snapshot().await;
        if let Err(e) = self.connector.close(&handle.conn).await {
            tracing::warn!(error = %e, "Error closing database connection");
        }
    }

    /// Run `op` against the current handle, reconnecting and retrying on
    /// transient failures.
    ///
    /// # Errors
    ///
    /// Returns `ExecuteError::Failed` with the original error for
    /// non-transient failures, and `ExecuteError::Exhausted` once the retry
    /// budget is spent.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        op: F,
    ) -> Result<T, ExecuteError<C::Error>>
    where
        F: Fn(C::Conn) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        let max_retries = self.policy.max_retries;
        let mut retries_left = max_retries;

        loop {
            let handle = self.snapshot().await;

            if self.mode.settings().prewarm
                && let Err(e) = self.connector.ping(&handle.conn).await
            {
                tracing::debug!(
                    operation,
                    error = %e,
                    "Connection warm-up failed, continuing with operation"
                );
            }

            let err = match op(handle.conn.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.connector.classify(&err).is_retryable() {
                tracing::debug!(operation, error = %err, "Database operation failed");
                return Err(ExecuteError::Failed(err));
            }

            if retries_left == 0 {
                tracing::error!(
                    operation,
                    retries = max_retries,
                    error = %err,
                    "All database reconnection attempts failed"
                );
                return Err(ExecuteError::Exhausted {
                    retries: max_retries,
                    source: err,
                });
            }

            let attempt = max_retries - retries_left + 1;
            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                operation,
                attempt,
                retries_left,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Database connection error, reconnecting"
            );
            tokio::time::sleep(delay).await;

            if let Err(reconnect_err) = self.reconnect(handle.generation).await {
                tracing::error!(
                    operation,
                    error = %reconnect_err,
                    "Failed to reconnect to database"
                );
                if retries_left <= 1 {
                    return Err(ExecuteError::Exhausted {
                        retries: max_retries,
                        source: err,
                    });
                }
                tokio::time::sleep(delay.saturating_mul(2)).await;
            }

            retries_left -= 1;
        }
    }

    async fn snapshot(&self) -> Handle<C::Conn> {
        self.current.read().await.clone()
    }

    /// Replace the handle if it is still generation `observed`.
    async fn reconnect(&self, observed: u64) -> Result<(), C::Error> {
        let _guard = self.reconnect_lock.lock().await;

        let stale = {
            let current = self.current.read().await;
            if current.generation != observed {
                tracing::debug!(
                    generation = current.generation,
                    "Connection already replaced by a concurrent reconnect"
                );
                return Ok(());
            }
            current.conn.clone()
        };

        if let Err(e) = self.connector.close(&stale).await {
            tracing::info!(error = %e, "Non-critical: error closing previous connection");
        }

        let fresh = self.connector.connect(self.mode).await?;
        let generation = {
            let mut current = self.current.write().await;
            current.conn = fresh.clone();
            current.generation += 1;
            current.generation
        };

        match self.connector.ping(&fresh).await {
            Ok(()) => tracing::info!(generation, "Reconnected and verified database connection"),
            Err(e) => tracing::warn!(
                generation,
                error = %e,
                "Connection verification failed, continuing with retry"
            ),
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::super::retry::classify_message;
    use super::*;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct ScriptError(String);

    impl ScriptError {
        fn new(message: &str) -> Self {
            Self(message.to_string())
        }
    }

    /// Connector whose handles are just the connect sequence number.
    #[derive(Default)]
    struct ScriptedConnector {
        connects: AtomicU32,
        closes: AtomicU32,
        pings: AtomicU32,
        failing_connects: AtomicU32,
        failing_pings: AtomicBool,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Conn = u32;
        type Error = ScriptError;

        async fn connect(&self, _mode: ConnectionMode) -> Result<u32, ScriptError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
            if self
                .failing_connects
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(ScriptError::new("connect ECONNREFUSED 127.0.0.1:5432"));
            }
            Ok(n)
        }

        async fn ping(&self, _conn: &u32) -> Result<(), ScriptError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.failing_pings.load(Ordering::SeqCst) {
                return Err(ScriptError::new("Connection terminated"));
            }
            Ok(())
        }

        async fn close(&self, _conn: &u32) -> Result<(), ScriptError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(ScriptError::new("pool already closed"))
        }

        fn classify(&self, err: &ScriptError) -> ErrorKind {
            classify_message(&err.0)
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        }
    }

    async fn manager(mode: ConnectionMode, max_retries: u32) -> ConnectionManager<ScriptedConnector> {
        ConnectionManager::connect(ScriptedConnector::default(), mode, fast_policy(max_retries))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_recovers_after_three_terminated_connections() {
        let manager = manager(ConnectionMode::Standard, 5).await;
        let calls = AtomicU32::new(0);

        let result = manager
            .execute_with_retry("get_products", |_conn| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call <= 3 {
                        Err(ScriptError::new("Connection terminated"))
                    } else {
                        Ok("flour")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "flour");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(manager.generation().await, 3);
        // Initial connection plus one per reconnect
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 4);
        // Close failures are non-fatal
        assert_eq!(manager.connector().closes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let manager = manager(ConnectionMode::Standard, 5).await;
        let calls = AtomicU32::new(0);

        let err = manager
            .execute_with_retry("create_user", |_conn| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ScriptError::new(
                        "duplicate key value violates unique constraint",
                    ))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Failed(_)));
        assert_eq!(
            err.to_string(),
            "duplicate key value violates unique constraint"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let manager = manager(ConnectionMode::Standard, 5).await;
        let calls = AtomicU32::new(0);

        let err = manager
            .execute_with_retry("get_contacts", |_conn| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ScriptError::new("Connection closed")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Exhausted { retries: 5, .. }));
        assert_eq!(
            err.to_string(),
            "database error after 5 retries: Connection closed"
        );
        // One initial attempt plus exactly five retries
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(manager.generation().await, 5);
    }

    #[tokio::test]
    async fn test_zero_budget_fails_on_first_transient_error() {
        let manager = manager(ConnectionMode::Standard, 0).await;

        let err = manager
            .execute_with_retry("get_user", |_conn| async {
                Err::<(), _>(ScriptError::new("socket hang up"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Exhausted { retries: 0, .. }));
        assert_eq!(manager.generation().await, 0);
    }

    #[tokio::test]
    async fn test_failed_reconnect_waits_and_retries() {
        let manager = manager(ConnectionMode::Standard, 5).await;
        manager
            .connector()
            .failing_connects
            .store(1, Ordering::SeqCst);
        let calls = AtomicU32::new(0);

        let result = manager
            .execute_with_retry("get_product", |_conn| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call == 1 {
                        Err(ScriptError::new("Connection lost"))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        // Reconnect failed, so the handle was never replaced
        assert_eq!(manager.generation().await, 0);
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_reconnect_on_last_retry_gives_up() {
        let manager = manager(ConnectionMode::Standard, 1).await;
        manager
            .connector()
            .failing_connects
            .store(1, Ordering::SeqCst);
        let calls = AtomicU32::new(0);

        let err = manager
            .execute_with_retry("clear_cart", |_conn| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ScriptError::new("Connection timeout")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Exhausted { retries: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_constrained_mode_prewarms_each_attempt() {
        let manager = manager(ConnectionMode::Constrained, 5).await;
        manager.connector().failing_pings.store(true, Ordering::SeqCst);

        // A failing warm-up does not stop the operation
        let value = manager
            .execute_with_retry("get_featured_products", |conn| async move {
                Ok::<_, ScriptError>(conn)
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(manager.connector().pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_standard_mode_skips_prewarm() {
        let manager = manager(ConnectionMode::Standard, 5).await;

        manager
            .execute_with_retry("get_products", |_conn| async { Ok::<_, ScriptError>(()) })
            .await
            .unwrap();

        assert_eq!(manager.connector().pings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_runs_on_fresh_handle() {
        let manager = manager(ConnectionMode::Standard, 5).await;

        let value = manager
            .execute_with_retry("get_cart_items", |conn| async move {
                if conn == 1 {
                    Err(ScriptError::new("terminating connection due to idle timeout"))
                } else {
                    Ok(conn)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_reconnect() {
        let manager = Arc::new(manager(ConnectionMode::Standard, 5).await);

        let run = |name: &'static str| {
            let manager = Arc::clone(&manager);
            async move {
                manager
                    .execute_with_retry(name, |conn| async move {
                        if conn == 1 {
                            Err(ScriptError::new("Connection terminated"))
                        } else {
                            Ok(conn)
                        }
                    })
                    .await
            }
        };

        let (first, second) = tokio::join!(run("get_user"), run("get_products"));

        assert_eq!(first.unwrap(), 2);
        assert_eq!(second.unwrap(), 2);
        assert_eq!(manager.generation().await, 1);
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.connector().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mode_settings() {
        let constrained = ConnectionMode::Constrained.settings();
        assert_eq!(constrained.max_connections, 1);
        assert!(!constrained.statement_cache);
        assert!(constrained.prewarm);
        assert!(constrained.connect_timeout > ConnectionMode::Standard.settings().connect_timeout);

        let standard = ConnectionMode::Standard.settings();
        assert_eq!(standard.max_connections, 10);
        assert!(standard.statement_cache);
        assert!(!standard.prewarm);
        assert!(standard.idle_timeout > constrained.idle_timeout);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "Constrained".parse::<ConnectionMode>(),
            Ok(ConnectionMode::Constrained)
        );
        assert_eq!(
            "serverless".parse::<ConnectionMode>(),
            Ok(ConnectionMode::Constrained)
        );
        assert_eq!("standard".parse::<ConnectionMode>(), Ok(ConnectionMode::Standard));
        assert!("pooled".parse::<ConnectionMode>().is_err());
    }
}
