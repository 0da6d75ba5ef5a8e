//! Core types for Millikit.
//!
//! This module provides type-safe wrappers for the storefront's domain concepts.

pub mod email;
pub mod id;
pub mod price;
pub mod quantity;
pub mod review;

pub use email::{Email, EmailError};
pub use id::*;
pub use price::{Price, PriceError};
pub use quantity::{Quantity, QuantityError};
pub use review::ProductReview;
