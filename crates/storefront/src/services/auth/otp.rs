//! Time-based one-time codes.
//!
//! [`TotpVerifier`] implements RFC 6238. Secrets are stored base32-encoded,
//! the form authenticator apps import, and codes default to HMAC-SHA1.

use chrono::Utc;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

/// Checks a submitted one-time code against a user's stored secret.
pub trait OtpVerifier: Send + Sync {
    /// Whether `code` is currently valid for `secret`.
    fn verify(&self, code: &str, secret: &str) -> bool;
}

/// HMAC hash used to derive codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotpAlgorithm {
    /// What authenticator apps assume when no algorithm is given.
    #[default]
    Sha1,
    Sha256,
}

/// Base32-encode raw secret bytes (no padding).
#[must_use]
pub fn encode_secret(secret: &[u8]) -> String {
    BASE32_NOPAD.encode(secret)
}

/// Decode a base32 secret. Case, spaces and trailing `=` padding are ignored.
#[must_use]
pub fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let normalized = normalized.trim_end_matches('=');
    if normalized.is_empty() {
        return None;
    }
    BASE32_NOPAD.decode(normalized.as_bytes()).ok()
}

/// RFC 6238 TOTP verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpVerifier {
    pub algorithm: TotpAlgorithm,
    /// Code length.
    pub digits: u32,
    /// Seconds per time step.
    pub step: u64,
    /// Steps of clock drift accepted on either side.
    pub skew: u64,
}

impl Default for TotpVerifier {
    fn default() -> Self {
        Self {
            algorithm: TotpAlgorithm::default(),
            digits: 6,
            step: 30,
            skew: 1,
        }
    }
}

impl TotpVerifier {
    /// Code for raw `secret` bytes at a given Unix time.
    ///
    /// Returns `None` if the secret cannot be used as an HMAC key.
    #[must_use]
    pub fn code_at(&self, secret: &[u8], unix_time: u64) -> Option<String> {
        self.code_for_counter(secret, unix_time / self.step.max(1))
    }

    /// Whether `code` matches the base32 `secret` at `unix_time`, within the
    /// skew window.
    #[must_use]
    pub fn verify_at(&self, code: &str, secret: &str, unix_time: u64) -> bool {
        let code = code.trim();
        if code.len() != self.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let Some(secret) = decode_secret(secret) else {
            return false;
        };

        let counter = unix_time / self.step.max(1);
        let first = counter.saturating_sub(self.skew);
        let last = counter.saturating_add(self.skew);
        (first..=last).any(|c| {
            self.code_for_counter(&secret, c)
                .is_some_and(|expected| constant_time_eq(expected.as_bytes(), code.as_bytes()))
        })
    }

    fn code_for_counter(&self, secret: &[u8], counter: u64) -> Option<String> {
        let message = counter.to_be_bytes();
        let digest = match self.algorithm {
            TotpAlgorithm::Sha1 => hmac_digest::<Hmac<Sha1>>(secret, &message)?,
            TotpAlgorithm::Sha256 => hmac_digest::<Hmac<Sha256>>(secret, &message)?,
        };

        // Dynamic truncation
        let offset = usize::from(digest.last()? & 0x0f);
        let window: [u8; 4] = digest.get(offset..offset + 4)?.try_into().ok()?;
        let binary = u32::from_be_bytes(window) & 0x7fff_ffff;

        let modulus = 10_u64.checked_pow(self.digits)?;
        let value = u64::from(binary) % modulus;
        Some(format!("{value:0width$}", width = self.digits as usize))
    }
}

impl OtpVerifier for TotpVerifier {
    fn verify(&self, code: &str, secret: &str) -> bool {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        self.verify_at(code, secret, now)
    }
}

fn hmac_digest<M: Mac + hmac::digest::KeyInit>(key: &[u8], message: &[u8]) -> Option<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key).ok()?;
    mac.update(message);
    Some(mac.finalize().into_bytes().to_vec())
}

pub(super) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // RFC 6238 appendix B test keys
    const SHA1_SECRET: &[u8] = b"12345678901234567890";
    const SHA256_SECRET: &[u8] = b"12345678901234567890123456789012";

    fn eight_digits(algorithm: TotpAlgorithm) -> TotpVerifier {
        TotpVerifier {
            algorithm,
            digits: 8,
            ..TotpVerifier::default()
        }
    }

    #[test]
    fn test_rfc6238_sha1_vectors() {
        let totp = eight_digits(TotpAlgorithm::Sha1);
        assert_eq!(totp.code_at(SHA1_SECRET, 59).unwrap(), "94287082");
        assert_eq!(totp.code_at(SHA1_SECRET, 1_111_111_109).unwrap(), "07081804");
        assert_eq!(totp.code_at(SHA1_SECRET, 1_111_111_111).unwrap(), "14050471");
        assert_eq!(totp.code_at(SHA1_SECRET, 1_234_567_890).unwrap(), "89005924");
        assert_eq!(totp.code_at(SHA1_SECRET, 2_000_000_000).unwrap(), "69279037");
    }

    #[test]
    fn test_rfc6238_sha256_vectors() {
        let totp = eight_digits(TotpAlgorithm::Sha256);
        assert_eq!(totp.code_at(SHA256_SECRET, 59).unwrap(), "46119246");
        assert_eq!(totp.code_at(SHA256_SECRET, 1_111_111_109).unwrap(), "68084774");
        assert_eq!(totp.code_at(SHA256_SECRET, 1_234_567_890).unwrap(), "91819424");
        assert_eq!(totp.code_at(SHA256_SECRET, 2_000_000_000).unwrap(), "90698825");
    }

    #[test]
    fn test_default_verifies_authenticator_secrets() {
        let totp = TotpVerifier::default();
        let secret = encode_secret(SHA1_SECRET);
        assert_eq!(secret, "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ");

        // Six-digit SHA1 code at T=59
        assert!(totp.verify_at("287082", &secret, 59));
        assert!(totp.verify_at("287082", &secret.to_lowercase(), 59));
        assert!(!totp.verify_at("287083", &secret, 59));
    }

    #[test]
    fn test_decode_secret_normalizes() {
        assert_eq!(decode_secret("JBSWY3DPEHPK3PXP").unwrap(), b"Hello!\xde\xad\xbe\xef");
        assert_eq!(
            decode_secret("jbsw y3dp ehpk 3pxp").unwrap(),
            b"Hello!\xde\xad\xbe\xef"
        );
        assert_eq!(
            decode_secret("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ====").unwrap(),
            SHA1_SECRET
        );
        assert!(decode_secret("not base32!").is_none());
        assert!(decode_secret("").is_none());
    }

    #[test]
    fn test_verify_accepts_adjacent_steps() {
        let totp = eight_digits(TotpAlgorithm::Sha256);
        let secret = encode_secret(SHA256_SECRET);
        assert!(totp.verify_at("91819424", &secret, 1_234_567_890));
        assert!(totp.verify_at("91819424", &secret, 1_234_567_890 + 30));
        assert!(totp.verify_at("91819424", &secret, 1_234_567_890 - 30));
        assert!(!totp.verify_at("91819424", &secret, 1_234_567_890 + 120));
    }

    #[test]
    fn test_verify_rejects_malformed_input() {
        let totp = TotpVerifier::default();
        let secret = encode_secret(SHA1_SECRET);
        assert!(!totp.verify_at("12345", &secret, 59));
        assert!(!totp.verify_at("12a456", &secret, 59));
        assert!(!totp.verify_at("123456", "not base32!", 59));
    }
}
