//! Business logic services for storefront.
//!
//! # Services
//!
//! - `auth` - Registration, password login, OTP enrollment and session users

pub mod auth;
