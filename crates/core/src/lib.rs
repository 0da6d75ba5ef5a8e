//! Millikit Core - Shared domain types.
//!
//! This crate provides the types shared by every Millikit component:
//! - `storefront` - Storage engines, auth collaborators and the server binary
//! - `cli` - Migrations, database checks and user management
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. Database encoding for the newtypes is opt-in through the
//! `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - Typed ids, emails, prices, cart quantities and product reviews

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
