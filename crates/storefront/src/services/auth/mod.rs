//! Authentication service.
//!
//! Provides username/password authentication with optional time-based
//! one-time codes as a second step.

mod error;
mod otp;

pub use error::AuthError;
pub use otp::{OtpVerifier, TotpAlgorithm, TotpVerifier, decode_secret, encode_secret};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use tracing::instrument;

use millikit_core::UserId;

use crate::db::{Storage, StorageError};
use crate::models::{NewUser, User};

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Allowed username length after trimming.
const USERNAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=64;

/// Bytes of randomness in a new OTP secret.
const OTP_SECRET_BYTES: usize = 20;

/// Upper bound on the derived key length read from a legacy hash.
const MAX_LEGACY_KEY_LEN: usize = 1024;

/// Result of a password login.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Password accepted and no second factor is configured.
    Authenticated(User),
    /// Password accepted; a one-time code must be verified next.
    OtpRequired(User),
}

/// The identity kept in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub username: String,
    pub is_admin: bool,
}

impl SessionUser {
    /// The value persisted in the session store. Only the id is kept; the
    /// rest is reloaded with [`AuthService::load_session_user`].
    #[must_use]
    pub const fn session_key(&self) -> UserId {
        self.id
    }
}

/// OTP secret generated for a user who has not yet confirmed enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOtp {
    /// Base32 secret to hand to the authenticator app.
    pub secret: String,
}

/// Authentication service.
///
/// Handles registration, login, OTP enrollment and session user loading.
pub struct AuthService<'a> {
    storage: &'a dyn Storage,
}

impl<'a> AuthService<'a> {
    /// Create a new authentication service.
    #[must_use]
    pub const fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    /// Register a new user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidUsername` if the username is empty or out of range.
    /// Returns `AuthError::WeakPassword` if the password doesn't meet requirements.
    /// Returns `AuthError::UserAlreadyExists` if the username is taken.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<User, AuthError> {
        let username = validate_username(username)?;
        validate_password(password)?;
        let password_hash = hash_password(password)?;

        let user = self
            .storage
            .create_user(NewUser {
                username: username.to_owned(),
                password_hash,
                is_admin,
            })
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => AuthError::UserAlreadyExists,
                other => AuthError::Storage(other),
            })?;

        tracing::info!(user_id = %user.id, "Registered user");
        Ok(user)
    }

    /// Check a username and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the username/password is wrong.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let user = self
            .storage
            .get_user_by_username(username.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &user.password_hash)?;

        if user.otp_enabled {
            Ok(LoginOutcome::OtpRequired(user))
        } else {
            Ok(LoginOutcome::Authenticated(user))
        }
    }

    /// Complete a login that returned [`LoginOutcome::OtpRequired`].
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidOtp` if the code is rejected and
    /// `AuthError::UserNotFound` if the user no longer exists.
    #[instrument(skip(self, code))]
    pub async fn verify_login_otp(&self, user_id: UserId, code: &str) -> Result<User, AuthError> {
        if !self.storage.verify_otp(user_id, code).await? {
            return Err(AuthError::InvalidOtp);
        }
        self.storage
            .get_user(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Generate a secret for a user to load into an authenticator app.
    ///
    /// Nothing is stored until [`Self::confirm_otp_enrollment`] succeeds.
    #[must_use]
    pub fn start_otp_enrollment(&self) -> PendingOtp {
        let bytes: [u8; OTP_SECRET_BYTES] = rand::random();
        PendingOtp {
            secret: encode_secret(&bytes),
        }
    }

    /// Enable OTP once the user proves their app generates valid codes.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidOtp` if the code does not match the pending
    /// secret and `AuthError::UserNotFound` if the user does not exist.
    #[instrument(skip(self, pending, code))]
    pub async fn confirm_otp_enrollment(
        &self,
        user_id: UserId,
        pending: &PendingOtp,
        code: &str,
    ) -> Result<User, AuthError> {
        if !self.storage.otp_verifier().verify(code, &pending.secret) {
            return Err(AuthError::InvalidOtp);
        }

        let user = self
            .storage
            .enable_otp(user_id, &pending.secret)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        tracing::info!(user_id = %user.id, "Enabled OTP");
        Ok(user)
    }

    /// Rebuild the session identity from a stored id.
    ///
    /// Returns `Ok(None)` if the user has been removed. A failing admin
    /// check is logged and treated as "not an admin".
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the user itself cannot be loaded.
    pub async fn load_session_user(&self, id: UserId) -> Result<Option<SessionUser>, AuthError> {
        let Some(user) = self.storage.get_user(id).await? else {
            return Ok(None);
        };

        let is_admin = match self.storage.is_admin(id).await {
            Ok(is_admin) => is_admin,
            Err(e) => {
                tracing::warn!(user_id = %id, error = %e, "Admin check failed, treating as non-admin");
                false
            }
        };

        Ok(Some(SessionUser {
            id: user.id,
            username: user.username,
            is_admin,
        }))
    }
}

/// Trim a username and check its length.
fn validate_username(username: &str) -> Result<&str, AuthError> {
    let trimmed = username.trim();
    let length = trimmed.chars().count();
    if !USERNAME_LENGTH.contains(&length) {
        return Err(AuthError::InvalidUsername(format!(
            "username must be {} to {} characters",
            USERNAME_LENGTH.start(),
            USERNAME_LENGTH.end()
        )));
    }
    Ok(trimmed)
}

/// Validate password meets requirements.
///
/// # Errors
///
/// Returns `AuthError::WeakPassword` if the password is too short.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Hash a password using Argon2id.
///
/// # Errors
///
/// Returns `AuthError::PasswordHash` if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
///
/// # Errors
///
/// Returns `AuthError::InvalidCredentials` if the hash is malformed or the
/// password does not match.
pub fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    if let Some(matches) = verify_legacy_pbkdf2(password, hash) {
        return if matches {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        };
    }

    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

/// Check `password` against a PBKDF2 hash in the
/// `salt:iterations:keylen:digest:hex` layout of accounts created before
/// Argon2 hashing. The salt is used as its literal text.
///
/// Returns `None` if `hash` is not in that layout.
fn verify_legacy_pbkdf2(password: &str, hash: &str) -> Option<bool> {
    let mut parts = hash.split(':');
    let (Some(salt), Some(iterations), Some(keylen), Some(digest), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };

    let iterations: u32 = iterations.parse().ok().filter(|&n| n > 0)?;
    let keylen: usize = keylen
        .parse()
        .ok()
        .filter(|n| (1..=MAX_LEGACY_KEY_LEN).contains(n))?;
    let expected = hex::decode(expected).ok()?;

    let mut derived = vec![0_u8; keylen];
    let (password, salt) = (password.as_bytes(), salt.as_bytes());
    match digest.to_ascii_lowercase().as_str() {
        "sha512" => pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut derived),
        "sha256" => pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut derived),
        "sha1" => pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut derived),
        _ => return None,
    }

    Some(otp::constant_time_eq(&derived, &expected))
}
