//! `PostgreSQL` storage engine.
//!
//! Every operation runs through [`ConnectionManager::execute_with_retry`], so
//! dropped or terminated connections are reconnected and the query retried
//! before the caller sees an error. Queries use runtime-checked
//! `sqlx::query_as` with row structs; rows are converted to domain types here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use millikit_core::{CartItemId, ContactId, Email, Price, ProductId, Quantity, UserId};

use super::connection::{ConnectionManager, ConnectionMode, PgConnector};
use super::retry::RetryPolicy;
use super::reviews::{decode_reviews, encode_reviews};
use super::storage::Storage;
use super::StorageError;
use crate::models::{
    CartItem, Contact, NewCartItem, NewContact, NewProduct, NewUser, Product, ProductPatch, User,
};
use crate::services::auth::OtpVerifier;

const USER_COLUMNS: &str = "id, username, password_hash, is_admin, otp_enabled, otp_secret";
const PRODUCT_COLUMNS: &str =
    "id, name, description, price, category, image_url, slug, featured, reviews";
const CART_COLUMNS: &str = "id, session_id, product_id, quantity";
const CONTACT_COLUMNS: &str = "id, name, email, message, created_at";

#[derive(FromRow)]
struct UserRow {
    id: UserId,
    username: String,
    password_hash: String,
    is_admin: bool,
    otp_enabled: bool,
    otp_secret: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            is_admin: row.is_admin,
            otp_enabled: row.otp_enabled,
            otp_secret: row.otp_secret,
        }
    }
}

#[derive(FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    description: String,
    price: Price,
    category: String,
    image_url: String,
    slug: String,
    featured: bool,
    reviews: Option<String>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            category: row.category,
            image_url: row.image_url,
            slug: row.slug,
            featured: row.featured,
            reviews: decode_reviews(row.reviews.as_deref()),
        }
    }
}

#[derive(FromRow)]
struct CartItemRow {
    id: CartItemId,
    session_id: String,
    product_id: ProductId,
    quantity: Quantity,
}

impl From<CartItemRow> for CartItem {
    fn from(row: CartItemRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            product_id: row.product_id,
            quantity: row.quantity,
        }
    }
}

#[derive(FromRow)]
struct ContactRow {
    id: ContactId,
    name: String,
    email: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ContactRow> for Contact {
    type Error = StorageError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            StorageError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            email,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

/// Escape `LIKE` wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `PostgreSQL` engine with reconnect-and-retry on transient failures.
pub struct ResilientStorage {
    manager: ConnectionManager<PgConnector>,
    otp: Arc<dyn OtpVerifier>,
}

impl ResilientStorage {
    /// Connect to the database.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Database` if the URL is invalid or the initial
    /// connection cannot be established.
    pub async fn connect(
        database_url: &SecretString,
        mode: ConnectionMode,
        policy: RetryPolicy,
        otp: Arc<dyn OtpVerifier>,
    ) -> Result<Self, StorageError> {
        let connector = PgConnector::from_url(database_url)?;
        let manager = ConnectionManager::connect(connector, mode, policy).await?;
        Ok(Self { manager, otp })
    }

    #[must_use]
    pub const fn mode(&self) -> ConnectionMode {
        self.manager.mode()
    }

    async fn fetch_products(
        &self,
        operation: &'static str,
        sql: &str,
        arg: Option<&str>,
    ) -> Result<Vec<Product>, StorageError> {
        let rows = self
            .manager
            .execute_with_retry(operation, |pool: PgPool| async move {
                let mut query = sqlx::query_as::<_, ProductRow>(sql);
                if let Some(arg) = arg {
                    query = query.bind(arg);
                }
                query.fetch_all(&pool).await
            })
            .await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }
}

#[async_trait]
impl Storage for ResilientStorage {
    fn otp_verifier(&self) -> &dyn OtpVerifier {
        self.otp.as_ref()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.manager.ping().await.map_err(StorageError::Database)
    }

    async fn close(&self) {
        self.manager.close().await;
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let sql = sql.as_str();
        let row = self
            .manager
            .execute_with_retry("get_user", |pool: PgPool| async move {
                sqlx::query_as::<_, UserRow>(sql)
                    .bind(id)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(User::from))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let sql = sql.as_str();
        let row = self
            .manager
            .execute_with_retry("get_user_by_username", |pool: PgPool| async move {
                sqlx::query_as::<_, UserRow>(sql)
                    .bind(username)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(User::from))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        let sql = format!(
            "INSERT INTO users (username, password_hash, is_admin) \
             VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        );
        let sql = sql.as_str();
        let user = &user;
        let row = self
            .manager
            .execute_with_retry("create_user", |pool: PgPool| async move {
                sqlx::query_as::<_, UserRow>(sql)
                    .bind(&user.username)
                    .bind(&user.password_hash)
                    .bind(user.is_admin)
                    .fetch_one(&pool)
                    .await
            })
            .await?;
        tracing::info!(user_id = %row.id, "Created user");
        Ok(row.into())
    }

    async fn is_admin(&self, id: UserId) -> Result<bool, StorageError> {
        let is_admin: Option<bool> = self
            .manager
            .execute_with_retry("is_admin", |pool: PgPool| async move {
                sqlx::query_scalar::<_, bool>("SELECT is_admin FROM users WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(is_admin.unwrap_or(false))
    }

    async fn enable_otp(&self, id: UserId, secret: &str) -> Result<Option<User>, StorageError> {
        let sql = format!(
            "UPDATE users SET otp_enabled = TRUE, otp_secret = $2 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let sql = sql.as_str();
        let row = self
            .manager
            .execute_with_retry("enable_otp", |pool: PgPool| async move {
                sqlx::query_as::<_, UserRow>(sql)
                    .bind(id)
                    .bind(secret)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(User::from))
    }

    async fn get_products(&self) -> Result<Vec<Product>, StorageError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id");
        self.fetch_products("get_products", &sql, None).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StorageError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let sql = sql.as_str();
        let row = self
            .manager
            .execute_with_retry("get_product", |pool: PgPool| async move {
                sqlx::query_as::<_, ProductRow>(sql)
                    .bind(id)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(Product::from))
    }

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>, StorageError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = $1");
        let sql = sql.as_str();
        let row = self
            .manager
            .execute_with_retry("get_product_by_slug", |pool: PgPool| async move {
                sqlx::query_as::<_, ProductRow>(sql)
                    .bind(slug)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(Product::from))
    }

    async fn get_products_by_category(
        &self,
        category: &str,
    ) -> Result<Vec<Product>, StorageError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE category = $1 ORDER BY id");
        self.fetch_products("get_products_by_category", &sql, Some(category)).await
    }

    async fn get_featured_products(&self) -> Result<Vec<Product>, StorageError> {
        let sql =
            format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE featured = TRUE ORDER BY id");
        self.fetch_products("get_featured_products", &sql, None).await
    }

    async fn search_products(&self, query: &str) -> Result<Vec<Product>, StorageError> {
        let query = query.trim();
        if query.is_empty() {
            return self.get_products().await;
        }

        let pattern = format!("%{}%", escape_like(query));
        let sql = format!(
            r"SELECT {PRODUCT_COLUMNS} FROM products
              WHERE name ILIKE $1 ESCAPE '\'
                 OR description ILIKE $1 ESCAPE '\'
                 OR category ILIKE $1 ESCAPE '\'
              ORDER BY id"
        );
        self.fetch_products("search_products", &sql, Some(&pattern)).await
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, StorageError> {
        let reviews = encode_reviews(&product.reviews)?;
        let sql = format!(
            "INSERT INTO products \
             (name, description, price, category, image_url, slug, featured, reviews) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {PRODUCT_COLUMNS}"
        );
        let sql = sql.as_str();
        let product = &product;
        let reviews = reviews.as_str();
        let row = self
            .manager
            .execute_with_retry("create_product", |pool: PgPool| async move {
                sqlx::query_as::<_, ProductRow>(sql)
                    .bind(&product.name)
                    .bind(&product.description)
                    .bind(product.price)
                    .bind(&product.category)
                    .bind(&product.image_url)
                    .bind(&product.slug)
                    .bind(product.featured)
                    .bind(reviews)
                    .fetch_one(&pool)
                    .await
            })
            .await?;
        tracing::info!(product_id = %row.id, slug = %row.slug, "Created product");
        Ok(row.into())
    }

    async fn update_product(
        &self,
        id: ProductId,
        patch: ProductPatch,
    ) -> Result<Option<Product>, StorageError> {
        if patch.is_empty() {
            return self.get_product(id).await;
        }

        let reviews = patch.reviews.as_deref().map(encode_reviews).transpose()?;
        let patch = &patch;
        let reviews = reviews.as_deref();
        let row = self
            .manager
            .execute_with_retry("update_product", |pool: PgPool| async move {
                let mut builder = QueryBuilder::<Postgres>::new("UPDATE products SET ");
                let mut set = builder.separated(", ");
                if let Some(name) = &patch.name {
                    set.push("name = ").push_bind_unseparated(name);
                }
                if let Some(description) = &patch.description {
                    set.push("description = ").push_bind_unseparated(description);
                }
                if let Some(price) = patch.price {
                    set.push("price = ").push_bind_unseparated(price);
                }
                if let Some(category) = &patch.category {
                    set.push("category = ").push_bind_unseparated(category);
                }
                if let Some(image_url) = &patch.image_url {
                    set.push("image_url = ").push_bind_unseparated(image_url);
                }
                if let Some(slug) = &patch.slug {
                    set.push("slug = ").push_bind_unseparated(slug);
                }
                if let Some(featured) = patch.featured {
                    set.push("featured = ").push_bind_unseparated(featured);
                }
                if let Some(reviews) = reviews {
                    set.push("reviews = ").push_bind_unseparated(reviews);
                }
                builder
                    .push(" WHERE id = ")
                    .push_bind(id)
                    .push(" RETURNING ")
                    .push(PRODUCT_COLUMNS);

                builder
                    .build_query_as::<ProductRow>()
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(Product::from))
    }

    async fn delete_product(&self, id: ProductId) -> Result<(), StorageError> {
        let deleted = self
            .manager
            .execute_with_retry("delete_product", |pool: PgPool| async move {
                sqlx::query("DELETE FROM products WHERE id = $1")
                    .bind(id)
                    .execute(&pool)
                    .await
            })
            .await?;
        tracing::info!(product_id = %id, rows = deleted.rows_affected(), "Deleted product");
        Ok(())
    }

    async fn get_cart_items(&self, session_id: &str) -> Result<Vec<CartItem>, StorageError> {
        let sql = format!("SELECT {CART_COLUMNS} FROM cart_items WHERE session_id = $1 ORDER BY id");
        let sql = sql.as_str();
        let rows = self
            .manager
            .execute_with_retry("get_cart_items", |pool: PgPool| async move {
                sqlx::query_as::<_, CartItemRow>(sql)
                    .bind(session_id)
                    .fetch_all(&pool)
                    .await
            })
            .await?;
        Ok(rows.into_iter().map(CartItem::from).collect())
    }

    async fn get_cart_item(
        &self,
        session_id: &str,
        product_id: ProductId,
    ) -> Result<Option<CartItem>, StorageError> {
        let sql = format!(
            "SELECT {CART_COLUMNS} FROM cart_items \
             WHERE session_id = $1 AND product_id = $2 ORDER BY id LIMIT 1"
        );
        let sql = sql.as_str();
        let row = self
            .manager
            .execute_with_retry("get_cart_item", |pool: PgPool| async move {
                sqlx::query_as::<_, CartItemRow>(sql)
                    .bind(session_id)
                    .bind(product_id)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(CartItem::from))
    }

    async fn add_to_cart(&self, item: NewCartItem) -> Result<CartItem, StorageError> {
        let sql = format!(
            "INSERT INTO cart_items (session_id, product_id, quantity) \
             VALUES ($1, $2, $3) RETURNING {CART_COLUMNS}"
        );
        let sql = sql.as_str();
        let item = &item;
        let row = self
            .manager
            .execute_with_retry("add_to_cart", |pool: PgPool| async move {
                sqlx::query_as::<_, CartItemRow>(sql)
                    .bind(&item.session_id)
                    .bind(item.product_id)
                    .bind(item.quantity)
                    .fetch_one(&pool)
                    .await
            })
            .await?;
        Ok(row.into())
    }

    async fn update_cart_item(
        &self,
        id: CartItemId,
        quantity: Quantity,
    ) -> Result<Option<CartItem>, StorageError> {
        let sql =
            format!("UPDATE cart_items SET quantity = $2 WHERE id = $1 RETURNING {CART_COLUMNS}");
        let sql = sql.as_str();
        let row = self
            .manager
            .execute_with_retry("update_cart_item", |pool: PgPool| async move {
                sqlx::query_as::<_, CartItemRow>(sql)
                    .bind(id)
                    .bind(quantity)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(CartItem::from))
    }

    async fn remove_from_cart(&self, id: CartItemId) -> Result<(), StorageError> {
        self.manager
            .execute_with_retry("remove_from_cart", |pool: PgPool| async move {
                sqlx::query("DELETE FROM cart_items WHERE id = $1")
                    .bind(id)
                    .execute(&pool)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn clear_cart(&self, session_id: &str) -> Result<(), StorageError> {
        self.manager
            .execute_with_retry("clear_cart", |pool: PgPool| async move {
                sqlx::query("DELETE FROM cart_items WHERE session_id = $1")
                    .bind(session_id)
                    .execute(&pool)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn create_contact(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let sql = format!(
            "INSERT INTO contacts (name, email, message) \
             VALUES ($1, $2, $3) RETURNING {CONTACT_COLUMNS}"
        );
        let sql = sql.as_str();
        let contact = &contact;
        let row = self
            .manager
            .execute_with_retry("create_contact", |pool: PgPool| async move {
                sqlx::query_as::<_, ContactRow>(sql)
                    .bind(&contact.name)
                    .bind(contact.email.as_str())
                    .bind(&contact.message)
                    .fetch_one(&pool)
                    .await
            })
            .await?;
        row.try_into()
    }

    async fn get_contacts(&self) -> Result<Vec<Contact>, StorageError> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY id");
        let sql = sql.as_str();
        let rows = self
            .manager
            .execute_with_retry("get_contacts", |pool: PgPool| async move {
                sqlx::query_as::<_, ContactRow>(sql).fetch_all(&pool).await
            })
            .await?;
        rows.into_iter().map(Contact::try_from).collect()
    }
}
