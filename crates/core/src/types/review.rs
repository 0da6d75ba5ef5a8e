//! Product reviews embedded in a product row.

use serde::{Deserialize, Serialize};

/// A customer review shown on a product page.
///
/// Reviews are not addressable rows: a product carries its reviews as one
/// serialized JSON array. Field names serialize in camelCase to match the
/// stored blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReview {
    /// Review identifier, unique within its product.
    pub id: String,
    /// Reviewer display name.
    pub name: String,
    /// Reviewer avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Review date as displayed (free-form, e.g. `2024-03-18`).
    pub date: String,
    /// Star rating, 1-5.
    pub rating: u8,
    /// Review body.
    pub comment: String,
    /// Number of shoppers who marked the review helpful.
    #[serde(default)]
    pub helpful_count: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_camel_case_blob() {
        let json = r#"{"id":"r1","name":"Ada","date":"2024-03-18","rating":5,"comment":"Fine grind","helpfulCount":3}"#;
        let review: ProductReview = serde_json::from_str(json).unwrap();
        assert_eq!(review.helpful_count, 3);
        assert_eq!(review.avatar, None);
    }

    #[test]
    fn test_missing_helpful_count_defaults_to_zero() {
        let json = r#"{"id":"r2","name":"Bo","date":"2024-04-01","rating":4,"comment":"Good"}"#;
        let review: ProductReview = serde_json::from_str(json).unwrap();
        assert_eq!(review.helpful_count, 0);
    }
}
