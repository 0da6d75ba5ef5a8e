//! Encoding of the review list stored on each product row.

use millikit_core::ProductReview;

use super::StorageError;

/// Decode a stored review blob.
///
/// Reviews are decoration: a missing, empty or malformed blob yields an
/// empty list instead of failing the product read.
#[must_use]
pub fn decode_reviews(raw: Option<&str>) -> Vec<ProductReview> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };

    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to parse product reviews, using empty list");
        Vec::new()
    })
}

/// Encode reviews for storage.
///
/// # Errors
///
/// Returns `StorageError::DataCorruption` if serialization fails.
pub fn encode_reviews(reviews: &[ProductReview]) -> Result<String, StorageError> {
    serde_json::to_string(reviews)
        .map_err(|e| StorageError::DataCorruption(format!("failed to encode reviews: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn review(id: &str, rating: u8) -> ProductReview {
        ProductReview {
            id: id.to_string(),
            name: "Ada".to_string(),
            avatar: None,
            date: "2024-03-18".to_string(),
            rating,
            comment: "Lovely crumb".to_string(),
            helpful_count: 2,
        }
    }

    #[test]
    fn test_encode_then_decode_is_identity() {
        let reviews = vec![review("r1", 5), review("r2", 3)];
        let encoded = encode_reviews(&reviews).unwrap();
        assert_eq!(decode_reviews(Some(&encoded)), reviews);
    }

    #[test]
    fn test_encoded_fields_are_camel_case() {
        let encoded = encode_reviews(&[review("r1", 5)]).unwrap();
        assert!(encoded.contains("\"helpfulCount\":2"));
    }

    #[test]
    fn test_absent_or_blank_is_empty() {
        assert!(decode_reviews(None).is_empty());
        assert!(decode_reviews(Some("")).is_empty());
        assert!(decode_reviews(Some("   ")).is_empty());
    }

    #[test]
    fn test_malformed_is_empty() {
        assert!(decode_reviews(Some("not json")).is_empty());
        assert!(decode_reviews(Some(r#"{"id":"r1"}"#)).is_empty());
        assert!(decode_reviews(Some(r#"[{"id":"r1"}]"#)).is_empty());
    }

    #[test]
    fn test_empty_array() {
        assert!(decode_reviews(Some("[]")).is_empty());
        assert_eq!(encode_reviews(&[]).unwrap(), "[]");
    }
}
