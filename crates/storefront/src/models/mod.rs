//! Domain models for the storefront.
//!
//! Entities are what the storage engines return. The `New*` and `*Patch`
//! structs are the typed inputs accepted by [`crate::db::Storage`].

pub mod cart;
pub mod contact;
pub mod product;
pub mod user;

pub use cart::{CartItem, CartLine, NewCartItem};
pub use contact::{Contact, NewContact};
pub use millikit_core::ProductReview;
pub use product::{NewProduct, Product, ProductPatch};
pub use user::{NewUser, User};
