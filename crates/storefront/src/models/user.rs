//! User domain types.

use core::fmt;

use serde::Serialize;

use millikit_core::UserId;

/// A storefront account.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Unique user ID.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// PHC-format password hash (algorithm, salt, parameters and digest).
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Whether the user can manage the catalog.
    pub is_admin: bool,
    /// Whether login requires a one-time code.
    pub otp_enabled: bool,
    /// Shared OTP secret, set once enrollment is confirmed.
    #[serde(skip_serializing)]
    pub otp_secret: Option<String>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("is_admin", &self.is_admin)
            .field("otp_enabled", &self.otp_enabled)
            .field(
                "otp_secret",
                &self.otp_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Input for creating a user.
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("is_admin", &self.is_admin)
            .finish()
    }
}
