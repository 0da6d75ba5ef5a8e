//! The storage contract shared by every engine.

use async_trait::async_trait;

use millikit_core::{CartItemId, ContactId, ProductId, Quantity, UserId};

use super::StorageError;
use crate::models::{
    CartItem, CartLine, Contact, NewCartItem, NewContact, NewProduct, NewUser, Product,
    ProductPatch, User,
};
use crate::services::auth::OtpVerifier;

/// Every persistence operation the storefront needs.
///
/// Lookups by identity return `Ok(None)` when nothing matches; they never
/// treat "not found" as an error. Creates return the stored entity with its
/// assigned id and fail with [`StorageError::Conflict`] on a duplicate
/// username or slug. Deletes are idempotent. List operations order rows by id.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The collaborator that checks submitted OTP codes.
    fn otp_verifier(&self) -> &dyn OtpVerifier;

    /// Check that the backing store is reachable, without retrying.
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Release connections at shutdown.
    async fn close(&self) {}

    // Users

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError>;

    async fn create_user(&self, user: NewUser) -> Result<User, StorageError>;

    /// Whether the user exists and is an admin.
    async fn is_admin(&self, id: UserId) -> Result<bool, StorageError> {
        Ok(self.get_user(id).await?.is_some_and(|user| user.is_admin))
    }

    /// Store `secret` and turn on OTP for the user.
    async fn enable_otp(&self, id: UserId, secret: &str) -> Result<Option<User>, StorageError>;

    /// Check a submitted code against the user's OTP secret.
    ///
    /// Returns `false` without consulting the verifier when the user does
    /// not exist, has OTP disabled, or has no secret on file.
    async fn verify_otp(&self, id: UserId, code: &str) -> Result<bool, StorageError> {
        let Some(user) = self.get_user(id).await? else {
            return Ok(false);
        };
        match user.otp_secret.as_deref() {
            Some(secret) if user.otp_enabled => Ok(self.otp_verifier().verify(code, secret)),
            _ => Ok(false),
        }
    }

    // Products

    async fn get_products(&self) -> Result<Vec<Product>, StorageError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StorageError>;

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>, StorageError>;

    async fn get_products_by_category(&self, category: &str)
    -> Result<Vec<Product>, StorageError>;

    async fn get_featured_products(&self) -> Result<Vec<Product>, StorageError>;

    /// Case-insensitive substring search over name, description and
    /// category. A blank query returns every product.
    async fn search_products(&self, query: &str) -> Result<Vec<Product>, StorageError>;

    async fn create_product(&self, product: NewProduct) -> Result<Product, StorageError>;

    /// Apply `patch`; `Ok(None)` if the product does not exist.
    async fn update_product(
        &self,
        id: ProductId,
        patch: ProductPatch,
    ) -> Result<Option<Product>, StorageError>;

    async fn delete_product(&self, id: ProductId) -> Result<(), StorageError>;

    // Cart

    async fn get_cart_items(&self, session_id: &str) -> Result<Vec<CartItem>, StorageError>;

    /// First cart row for this session and product, if any.
    async fn get_cart_item(
        &self,
        session_id: &str,
        product_id: ProductId,
    ) -> Result<Option<CartItem>, StorageError>;

    /// Insert a cart row. Existing rows for the same product are not merged.
    async fn add_to_cart(&self, item: NewCartItem) -> Result<CartItem, StorageError>;

    async fn update_cart_item(
        &self,
        id: CartItemId,
        quantity: Quantity,
    ) -> Result<Option<CartItem>, StorageError>;

    async fn remove_from_cart(&self, id: CartItemId) -> Result<(), StorageError>;

    async fn clear_cart(&self, session_id: &str) -> Result<(), StorageError>;

    /// Cart rows joined with their products.
    async fn get_cart_lines(&self, session_id: &str) -> Result<Vec<CartLine>, StorageError> {
        let items = self.get_cart_items(session_id).await?;
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product = self.get_product(item.product_id).await?;
            lines.push(CartLine { item, product });
        }
        Ok(lines)
    }

    // Contacts

    async fn create_contact(&self, contact: NewContact) -> Result<Contact, StorageError>;

    async fn get_contacts(&self) -> Result<Vec<Contact>, StorageError>;
}
