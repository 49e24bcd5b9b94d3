//! Variant-scoped pagination cursors.
//!
//! Cursors returned by inner servers are opaque to clients but meaningless
//! outside their owning variant. The proxy wraps every outgoing `nextCursor`
//! with the variant id and validates the pairing when the cursor comes back,
//! so a cursor issued under variant A can never silently paginate variant B.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::VariantGateError;

/// Wire form of a wrapped cursor: a minimal JSON object, base64url-encoded.
#[derive(Debug, Serialize, Deserialize)]
struct VariantCursor<'a> {
    /// Owning variant id
    #[serde(rename = "v")]
    variant_id: std::borrow::Cow<'a, str>,
    /// The inner server's cursor, unmodified
    #[serde(rename = "c")]
    inner_cursor: std::borrow::Cow<'a, str>,
}

/// Wrap a cursor from an inner server with its owning variant id.
///
/// Empty cursors stay empty: "no more pages" must survive the round trip.
pub fn wrap_cursor(inner_cursor: &str, variant_id: &str) -> String {
    if inner_cursor.is_empty() {
        return String::new();
    }
    let wrapped = VariantCursor {
        variant_id: variant_id.into(),
        inner_cursor: inner_cursor.into(),
    };
    // Serialization of two borrowed strings cannot fail.
    let data = serde_json::to_vec(&wrapped).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(data)
}

/// Validate and unwrap a cursor for the expected variant.
///
/// # Errors
///
/// * [`VariantGateError::InvalidCursor`] when the encoding or the JSON
///   payload is malformed.
/// * [`VariantGateError::CursorVariantMismatch`] when the cursor belongs to
///   a different variant; the error data carries both ids.
pub fn unwrap_cursor(cursor: &str, expected_variant: &str) -> Result<String, VariantGateError> {
    if cursor.is_empty() {
        return Ok(String::new());
    }

    let data = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| VariantGateError::InvalidCursor)?;

    let wrapped: VariantCursor<'_> =
        serde_json::from_slice(&data).map_err(|_| VariantGateError::InvalidCursor)?;

    if wrapped.variant_id != expected_variant {
        return Err(VariantGateError::CursorVariantMismatch {
            cursor_variant: wrapped.variant_id.into_owned(),
            requested_variant: expected_variant.to_string(),
        });
    }

    Ok(wrapped.inner_cursor.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let wrapped = wrap_cursor("page-2", "coding");
        assert_ne!(wrapped, "page-2");
        let inner = unwrap_cursor(&wrapped, "coding").unwrap();
        assert_eq!(inner, "page-2");
    }

    #[test]
    fn test_roundtrip_arbitrary_strings() {
        for (cursor, variant) in [
            ("0", "a"),
            ("offset=42&shard=7", "variant-with-dashes"),
            ("日本語カーソル", "unicode✓"),
            ("with \"quotes\" and \\ backslashes", "v"),
        ] {
            let wrapped = wrap_cursor(cursor, variant);
            assert_eq!(unwrap_cursor(&wrapped, variant).unwrap(), cursor);
        }
    }

    #[test]
    fn test_empty_cursor_stays_empty() {
        assert_eq!(wrap_cursor("", "coding"), "");
        assert_eq!(unwrap_cursor("", "coding").unwrap(), "");
    }

    #[test]
    fn test_cross_variant_reuse_rejected() {
        let wrapped = wrap_cursor("page-2", "coding");
        let err = unwrap_cursor(&wrapped, "compact").unwrap_err();

        match err {
            VariantGateError::CursorVariantMismatch {
                cursor_variant,
                requested_variant,
            } => {
                assert_eq!(cursor_variant, "coding");
                assert_eq!(requested_variant, "compact");
            }
            other => panic!("expected CursorVariantMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_mismatch_maps_to_invalid_params() {
        let wrapped = wrap_cursor("c", "a");
        let err = unwrap_cursor(&wrapped, "b").unwrap_err();
        assert_eq!(err.to_jsonrpc_code(), -32602);
    }

    #[test]
    fn test_malformed_base64_rejected() {
        let err = unwrap_cursor("!!!not-base64!!!", "coding").unwrap_err();
        assert_eq!(err, VariantGateError::InvalidCursor);
        assert_eq!(err.to_jsonrpc_code(), -32602);
    }

    #[test]
    fn test_malformed_json_rejected() {
        let bogus = URL_SAFE_NO_PAD.encode(b"not json at all");
        let err = unwrap_cursor(&bogus, "coding").unwrap_err();
        assert_eq!(err, VariantGateError::InvalidCursor);
    }

    #[test]
    fn test_wire_shape_is_minimal_json() {
        let wrapped = wrap_cursor("inner", "coding");
        let decoded = URL_SAFE_NO_PAD.decode(wrapped).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value, serde_json::json!({"v": "coding", "c": "inner"}));
    }
}
