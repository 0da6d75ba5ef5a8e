//! Integration tests for the `PostgreSQL` storage engine.
//!
//! These tests require:
//! - A running `PostgreSQL` database
//! - `DATABASE_URL` (or the `PG*` variables) pointing at it
//!
//! Run with: cargo test -p millikit-integration-tests -- --ignored

#![allow(clippy::unwrap_used)]

use millikit_core::{Email, Price, ProductReview, Quantity};
use millikit_integration_tests::{connect_storage, unique};
use millikit_storefront::db::{Storage, StorageError};
use millikit_storefront::models::{NewCartItem, NewContact, NewProduct, NewUser, ProductPatch};

fn new_product(slug: &str, category: &str) -> NewProduct {
    NewProduct {
        name: format!("Flour {slug}"),
        description: "Whole grain, milled on stone".to_string(),
        price: Price::from_cents(1299),
        category: category.to_string(),
        image_url: "/images/flour.jpg".to_string(),
        slug: slug.to_string(),
        featured: false,
        reviews: Vec::new(),
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_ping_and_close() {
    let storage = connect_storage().await.unwrap();
    storage.ping().await.unwrap();
    storage.close().await;
}

// ============================================================================
// Product Tests
// ============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_product_by_slug() {
    let storage = connect_storage().await.unwrap();
    let slug = unique("stone-ground-flour");

    let created = storage
        .create_product(new_product(&slug, "flour"))
        .await
        .unwrap();

    let found = storage.get_product_by_slug(&slug).await.unwrap();
    assert_eq!(found, Some(created.clone()));
    assert!(
        storage
            .get_product_by_slug(&unique("nonexistent"))
            .await
            .unwrap()
            .is_none()
    );

    storage.delete_product(created.id).await.unwrap();
    storage.close().await;
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_duplicate_slug_is_conflict() {
    let storage = connect_storage().await.unwrap();
    let slug = unique("rye");

    let created = storage.create_product(new_product(&slug, "flour")).await.unwrap();
    let result = storage.create_product(new_product(&slug, "flour")).await;
    assert!(matches!(result, Err(StorageError::Conflict(_))));

    storage.delete_product(created.id).await.unwrap();
    storage.close().await;
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_reviews_survive_storage() {
    let storage = connect_storage().await.unwrap();
    let mut input = new_product(&unique("spelt"), "flour");
    input.reviews = vec![ProductReview {
        id: "r1".to_string(),
        name: "Ada".to_string(),
        avatar: None,
        date: "2024-03-18".to_string(),
        rating: 5,
        comment: "Bakes a tall loaf".to_string(),
        helpful_count: 2,
    }];

    let created = storage.create_product(input.clone()).await.unwrap();
    let loaded = storage.get_product(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.reviews, input.reviews);

    storage.delete_product(created.id).await.unwrap();
    storage.close().await;
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_update_and_search() {
    let storage = connect_storage().await.unwrap();
    let category = unique("grains");
    let created = storage
        .create_product(new_product(&unique("emmer"), &category))
        .await
        .unwrap();

    let patch = ProductPatch {
        featured: Some(true),
        price: Some(Price::from_cents(1499)),
        ..ProductPatch::default()
    };
    let updated = storage.update_product(created.id, patch).await.unwrap().unwrap();
    assert!(updated.featured);
    assert_eq!(updated.price, Price::from_cents(1499));
    assert_eq!(updated.name, created.name);

    let by_category = storage.get_products_by_category(&category).await.unwrap();
    assert_eq!(by_category.len(), 1);

    let hits = storage.search_products(&category.to_uppercase()).await.unwrap();
    assert!(hits.iter().any(|p| p.id == created.id));

    // Wildcards are matched literally
    let wildcard = storage.search_products("100%_").await.unwrap();
    assert!(wildcard.iter().all(|p| p.id != created.id));

    storage.delete_product(created.id).await.unwrap();
    assert!(
        storage
            .update_product(created.id, ProductPatch::default())
            .await
            .unwrap()
            .is_none()
    );
    storage.close().await;
}

// ============================================================================
// Cart Tests
// ============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_cart_rows_are_not_merged() {
    let storage = connect_storage().await.unwrap();
    let product = storage
        .create_product(new_product(&unique("semolina"), "flour"))
        .await
        .unwrap();
    let session = unique("sess");
    let item = NewCartItem {
        session_id: session.clone(),
        product_id: product.id,
        quantity: Quantity::new(2).unwrap(),
    };

    let first = storage.add_to_cart(item.clone()).await.unwrap();
    let second = storage.add_to_cart(item).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(storage.get_cart_items(&session).await.unwrap().len(), 2);

    let existing = storage.get_cart_item(&session, product.id).await.unwrap();
    assert_eq!(existing.map(|i| i.id), Some(first.id));

    let lines = storage.get_cart_lines(&session).await.unwrap();
    assert!(lines.iter().all(|l| l.product.as_ref() == Some(&product)));

    let bumped = storage
        .update_cart_item(first.id, Quantity::new(5).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bumped.quantity.get(), 5);

    storage.remove_from_cart(second.id).await.unwrap();
    assert_eq!(storage.get_cart_items(&session).await.unwrap().len(), 1);

    storage.clear_cart(&session).await.unwrap();
    assert!(storage.get_cart_items(&session).await.unwrap().is_empty());

    storage.delete_product(product.id).await.unwrap();
    storage.close().await;
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_deleting_product_removes_cart_rows() {
    let storage = connect_storage().await.unwrap();
    let product = storage
        .create_product(new_product(&unique("barley"), "flour"))
        .await
        .unwrap();
    let session = unique("sess");
    storage
        .add_to_cart(NewCartItem {
            session_id: session.clone(),
            product_id: product.id,
            quantity: Quantity::ONE,
        })
        .await
        .unwrap();

    storage.delete_product(product.id).await.unwrap();
    assert!(storage.get_cart_items(&session).await.unwrap().is_empty());
    storage.close().await;
}

// ============================================================================
// User & Contact Tests
// ============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_users_and_otp_flag() {
    let storage = connect_storage().await.unwrap();
    let username = unique("miller");
    let new_user = NewUser {
        username: username.clone(),
        password_hash: "not-a-real-hash".to_string(),
        is_admin: false,
    };

    let user = storage.create_user(new_user.clone()).await.unwrap();
    assert!(!user.otp_enabled);
    assert!(!storage.is_admin(user.id).await.unwrap());
    assert!(!storage.verify_otp(user.id, "000000").await.unwrap());

    let duplicate = storage.create_user(new_user).await;
    assert!(matches!(duplicate, Err(StorageError::Conflict(_))));

    let enabled = storage.enable_otp(user.id, "00ff").await.unwrap().unwrap();
    assert!(enabled.otp_enabled);
    assert_eq!(
        storage.get_user_by_username(&username).await.unwrap().map(|u| u.id),
        Some(user.id)
    );
    storage.close().await;
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_contact_roundtrip() {
    let storage = connect_storage().await.unwrap();
    let name = unique("visitor");

    let contact = storage
        .create_contact(NewContact {
            name: name.clone(),
            email: Email::parse("visitor@example.com").unwrap(),
            message: "Do you ship rye?".to_string(),
        })
        .await
        .unwrap();

    let contacts = storage.get_contacts().await.unwrap();
    assert!(contacts.iter().any(|c| c.id == contact.id && c.name == name));
    storage.close().await;
}
