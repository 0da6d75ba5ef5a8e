//! In-process storage engine.
//!
//! Mirrors the `PostgreSQL` engine's observable behavior (sequential ids,
//! unique usernames and slugs, cascade from products to cart rows, no cart
//! merge) without a database. Used for local development and tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use millikit_core::{CartItemId, ContactId, ProductId, Quantity, UserId};

use super::StorageError;
use super::storage::Storage;
use crate::models::{
    CartItem, Contact, NewCartItem, NewContact, NewProduct, NewUser, Product, ProductPatch, User,
};
use crate::services::auth::{OtpVerifier, TotpVerifier};

/// Per-table id counter. Like a `SERIAL` column, ids are never reused.
#[derive(Default)]
struct Sequence(i32);

impl Sequence {
    fn next(&mut self) -> i32 {
        self.0 += 1;
        self.0
    }
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    products: BTreeMap<ProductId, Product>,
    cart_items: BTreeMap<CartItemId, CartItem>,
    contacts: BTreeMap<ContactId, Contact>,
    user_ids: Sequence,
    product_ids: Sequence,
    cart_item_ids: Sequence,
    contact_ids: Sequence,
}

impl Tables {
    fn slug_taken(&self, slug: &str, except: Option<ProductId>) -> bool {
        self.products
            .values()
            .any(|p| p.slug == slug && Some(p.id) != except)
    }
}

/// Storage engine backed by in-memory maps.
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    otp: Arc<dyn OtpVerifier>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new(otp: Arc<dyn OtpVerifier>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            otp,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(Arc::new(TotpVerifier::default()))
    }
}

fn matches_query(product: &Product, needle: &str) -> bool {
    [&product.name, &product.description, &product.category]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

#[async_trait]
impl Storage for MemoryStorage {
    fn otp_verifier(&self) -> &dyn OtpVerifier {
        self.otp.as_ref()
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StorageError::Conflict("username already exists".to_owned()));
        }

        let id = UserId::new(tables.user_ids.next());
        let user = User {
            id,
            username: user.username,
            password_hash: user.password_hash,
            is_admin: user.is_admin,
            otp_enabled: false,
            otp_secret: None,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn enable_otp(&self, id: UserId, secret: &str) -> Result<Option<User>, StorageError> {
        let mut tables = self.tables.write().await;
        Ok(tables.users.get_mut(&id).map(|user| {
            user.otp_enabled = true;
            user.otp_secret = Some(secret.to_owned());
            user.clone()
        }))
    }

    async fn get_products(&self) -> Result<Vec<Product>, StorageError> {
        Ok(self.tables.read().await.products.values().cloned().collect())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StorageError> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.products.values().find(|p| p.slug == slug).cloned())
    }

    async fn get_products_by_category(
        &self,
        category: &str,
    ) -> Result<Vec<Product>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .products
            .values()
            .filter(|p| p.category == category)
            .cloned()
            .collect())
    }

    async fn get_featured_products(&self) -> Result<Vec<Product>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .products
            .values()
            .filter(|p| p.featured)
            .cloned()
            .collect())
    }

    async fn search_products(&self, query: &str) -> Result<Vec<Product>, StorageError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.get_products().await;
        }

        let tables = self.tables.read().await;
        Ok(tables
            .products
            .values()
            .filter(|p| matches_query(p, &needle))
            .cloned()
            .collect())
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, StorageError> {
        let mut tables = self.tables.write().await;
        if tables.slug_taken(&product.slug, None) {
            return Err(StorageError::Conflict("slug already exists".to_owned()));
        }

        let id = ProductId::new(tables.product_ids.next());
        let product = product.into_product(id);
        tables.products.insert(id, product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        id: ProductId,
        patch: ProductPatch,
    ) -> Result<Option<Product>, StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.products.contains_key(&id) {
            return Ok(None);
        }
        if let Some(slug) = &patch.slug
            && tables.slug_taken(slug, Some(id))
        {
            return Err(StorageError::Conflict("slug already exists".to_owned()));
        }

        Ok(tables.products.get_mut(&id).map(|product| {
            patch.apply_to(product);
            product.clone()
        }))
    }

    async fn delete_product(&self, id: ProductId) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if tables.products.remove(&id).is_some() {
            tables.cart_items.retain(|_, item| item.product_id != id);
        }
        Ok(())
    }

    async fn get_cart_items(&self, session_id: &str) -> Result<Vec<CartItem>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .cart_items
            .values()
            .filter(|item| item.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn get_cart_item(
        &self,
        session_id: &str,
        product_id: ProductId,
    ) -> Result<Option<CartItem>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .cart_items
            .values()
            .find(|item| item.session_id == session_id && item.product_id == product_id)
            .cloned())
    }

    async fn add_to_cart(&self, item: NewCartItem) -> Result<CartItem, StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.products.contains_key(&item.product_id) {
            return Err(StorageError::Conflict(format!(
                "product {} does not exist",
                item.product_id
            )));
        }

        let id = CartItemId::new(tables.cart_item_ids.next());
        let item = CartItem {
            id,
            session_id: item.session_id,
            product_id: item.product_id,
            quantity: item.quantity,
        };
        tables.cart_items.insert(id, item.clone());
        Ok(item)
    }

    async fn update_cart_item(
        &self,
        id: CartItemId,
        quantity: Quantity,
    ) -> Result<Option<CartItem>, StorageError> {
        let mut tables = self.tables.write().await;
        Ok(tables.cart_items.get_mut(&id).map(|item| {
            item.quantity = quantity;
            item.clone()
        }))
    }

    async fn remove_from_cart(&self, id: CartItemId) -> Result<(), StorageError> {
        self.tables.write().await.cart_items.remove(&id);
        Ok(())
    }

    async fn clear_cart(&self, session_id: &str) -> Result<(), StorageError> {
        self.tables
            .write()
            .await
            .cart_items
            .retain(|_, item| item.session_id != session_id);
        Ok(())
    }

    async fn create_contact(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut tables = self.tables.write().await;
        let id = ContactId::new(tables.contact_ids.next());
        let contact = Contact {
            id,
            name: contact.name,
            email: contact.email,
            message: contact.message,
            created_at: Utc::now(),
        };
        tables.contacts.insert(id, contact.clone());
        Ok(contact)
    }

    async fn get_contacts(&self) -> Result<Vec<Contact>, StorageError> {
        Ok(self.tables.read().await.contacts.values().cloned().collect())
    }
}
