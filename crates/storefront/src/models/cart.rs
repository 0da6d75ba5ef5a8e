//! Shopping cart types.

use serde::{Deserialize, Serialize};

use millikit_core::{CartItemId, ProductId, Quantity};

use super::Product;

/// One row of a session's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartItem {
    pub id: CartItemId,
    /// Groups items per anonymous or signed-in session.
    pub session_id: String,
    pub product_id: ProductId,
    pub quantity: Quantity,
}

/// A cart item joined with its product for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub item: CartItem,
    /// `None` if the product has since been deleted.
    pub product: Option<Product>,
}

/// Input for adding a product to a cart.
///
/// Adding the same product twice creates a second row; callers that want a
/// single line check [`crate::db::Storage::get_cart_item`] first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewCartItem {
    pub session_id: String,
    pub product_id: ProductId,
    pub quantity: Quantity,
}
