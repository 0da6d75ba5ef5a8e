//! Catalog product types.

use serde::{Deserialize, Serialize};

use millikit_core::{Price, ProductId, ProductReview};

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Price,
    pub category: String,
    pub image_url: String,
    /// Unique URL key.
    pub slug: String,
    /// Shown on the home page.
    pub featured: bool,
    /// Decoded from the product's stored review blob.
    pub reviews: Vec<ProductReview>,
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Price,
    pub category: String,
    pub image_url: String,
    pub slug: String,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub reviews: Vec<ProductReview>,
}

/// Partial update of a product; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Price>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub slug: Option<String>,
    pub featured: Option<bool>,
    pub reviews: Option<Vec<ProductReview>>,
}

impl ProductPatch {
    /// Whether applying the patch would change nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.category.is_none()
            && self.image_url.is_none()
            && self.slug.is_none()
            && self.featured.is_none()
            && self.reviews.is_none()
    }

    /// Apply the patch to an in-memory product.
    pub fn apply_to(self, product: &mut Product) {
        if let Some(name) = self.name {
            product.name = name;
        }
        if let Some(description) = self.description {
            product.description = description;
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(category) = self.category {
            product.category = category;
        }
        if let Some(image_url) = self.image_url {
            product.image_url = image_url;
        }
        if let Some(slug) = self.slug {
            product.slug = slug;
        }
        if let Some(featured) = self.featured {
            product.featured = featured;
        }
        if let Some(reviews) = self.reviews {
            product.reviews = reviews;
        }
    }
}

impl NewProduct {
    /// Build the stored product once an id has been assigned.
    #[must_use]
    pub fn into_product(self, id: ProductId) -> Product {
        Product {
            id,
            name: self.name,
            description: self.description,
            price: self.price,
            category: self.category,
            image_url: self.image_url,
            slug: self.slug,
            featured: self.featured,
            reviews: self.reviews,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn flour() -> Product {
        NewProduct {
            name: "Stone Ground Flour".to_string(),
            description: "Whole wheat, milled slowly".to_string(),
            price: Price::from_cents(899),
            category: "flour".to_string(),
            image_url: "/images/flour.jpg".to_string(),
            slug: "stone-ground-flour".to_string(),
            featured: false,
            reviews: Vec::new(),
        }
        .into_product(ProductId::new(1))
    }

    #[test]
    fn test_default_patch_is_empty() {
        assert!(ProductPatch::default().is_empty());
        let patch = ProductPatch {
            featured: Some(true),
            ..ProductPatch::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_apply_only_touches_set_fields() {
        let mut product = flour();
        ProductPatch {
            price: Some(Price::from_cents(999)),
            featured: Some(true),
            ..ProductPatch::default()
        }
        .apply_to(&mut product);

        assert_eq!(product.price, Price::from_cents(999));
        assert!(product.featured);
        assert_eq!(product.name, "Stone Ground Flour");
        assert_eq!(product.slug, "stone-ground-flour");
    }

    #[test]
    fn test_patch_deserializes_sparse_json() {
        let patch: ProductPatch = serde_json::from_str(r#"{"name":"Rye Flour"}"#).unwrap();
        assert_eq!(patch.name.as_deref(), Some("Rye Flour"));
        assert!(patch.price.is_none());
    }
}
