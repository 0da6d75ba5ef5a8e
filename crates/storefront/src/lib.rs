//! Millikit storefront library.
//!
//! Storage engines, authentication collaborators and configuration for the
//! storefront, plus the health routes served by the binary.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
