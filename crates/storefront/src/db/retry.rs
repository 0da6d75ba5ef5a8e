//! Retry policy and failure classification for database operations.
//!
//! Only failures classified as [`ErrorKind::Transient`] are retried. The
//! driver's structured errors (I/O, pool state, SQLSTATE codes) are mapped
//! first; errors without a structured signal fall back to a case-insensitive
//! substring match against [`TRANSIENT_PATTERNS`].
//!
//! The backoff is linear in the attempt number (`base_delay * attempt`) plus
//! up to `max_jitter` of random jitter, so a single request never waits
//! longer than `base_delay * max_retries * (max_retries + 1) / 2` in total.

use std::time::Duration;

use rand::Rng;

/// Lowercased message fragments that indicate a lost, refused or timed-out
/// connection.
pub const TRANSIENT_PATTERNS: &[&str] = &[
    // Server-side connection loss
    "terminating connection",
    "connection terminated",
    "connection closed",
    "connection lost",
    "could not connect",
    "timeout",
    "idle_in_transaction",
    "query_canceled",
    "connection has been closed",
    "connection is closed",
    // Socket and DNS level
    "socket hang up",
    "econnrefused",
    "etimedout",
    "enotfound",
    "connection timeout",
    "network error",
    "connection timed out",
    // Managed/serverless Postgres providers
    "connection has been terminated",
    "timed out waiting for connection",
    "idle connection has been terminated",
];

/// SQLSTATE codes outside class `08` that still mean the session is gone.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
    "57014", // query_canceled
    "25P03", // idle_in_transaction_session_timeout
    "53300", // too_many_connections
];

/// How a failed database operation should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection-level failure; reconnect and retry.
    Transient,
    /// Query-level failure (constraint, syntax, decode); never retried.
    Permanent,
    /// No signal either way; treated like `Permanent`.
    Unknown,
}

impl ErrorKind {
    /// Whether the failure qualifies for reconnect-and-retry.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Classify an error by its message alone.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if TRANSIENT_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
    {
        ErrorKind::Transient
    } else {
        ErrorKind::Unknown
    }
}

/// Classify a Postgres SQLSTATE code.
#[must_use]
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    if code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&code) {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Classify a `sqlx` error, preferring structured information over text.
#[must_use]
pub fn classify_sqlx(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorKind::Transient,
        sqlx::Error::Database(db_err) => db_err.code().map_or_else(
            || classify_message(db_err.message()),
            |code| classify_sqlstate(&code),
        ),
        sqlx::Error::Configuration(_)
        | sqlx::Error::RowNotFound
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => ErrorKind::Permanent,
        other => classify_message(&other.to_string()),
    }
}

/// Bounded linear backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reconnect-and-retry attempts allowed per operation.
    pub max_retries: u32,
    /// Delay before the first retry; attempt `n` waits `n` times this.
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Default retry budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 5;
    /// Default base delay.
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);
    /// Default jitter bound.
    pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

    /// Delay for a 1-based attempt number, without jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Delay for a 1-based attempt number, with jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay_for(attempt).saturating_add(self.jitter())
    }

    /// Jitter-free delays for every attempt the budget allows.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_retries).map(|attempt| self.base_delay_for(attempt))
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_jitter: Self::DEFAULT_MAX_JITTER,
        }
    }
}
