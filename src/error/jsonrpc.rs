//! JSON-RPC 2.0 error objects.
//!
//! [`JsonRpcError`] is the wire-level error embedded in JSON-RPC responses.
//! The `data` field is an arbitrary JSON value: the proxy must carry inner
//! server error data through to the front client unchanged, and enrichment
//! merges into a copy of it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard JSON-RPC 2.0 error codes.
pub mod code {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// JSON-RPC 2.0 error object.
///
/// This structure is embedded in JSON-RPC error responses and follows
/// the JSON-RPC 2.0 specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard or server-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error with no additional data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error carrying structured data.
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create an invalid-params (-32602) error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(code::INVALID_PARAMS, message)
    }

    /// Create a method-not-found (-32601) error for the given method.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            code::METHOD_NOT_FOUND,
            format!("Method '{method}' not found"),
        )
    }

    /// Create an internal (-32603) error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(code::INTERNAL_ERROR, message)
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_serialization() {
        let error = JsonRpcError::with_data(
            code::INVALID_PARAMS,
            "Invalid server variant",
            json!({
                "requestedVariant": "nonexistent",
                "availableVariants": ["coding", "compact"]
            }),
        );

        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["code"], -32602);
        assert_eq!(value["message"], "Invalid server variant");
        assert_eq!(value["data"]["requestedVariant"], "nonexistent");
        assert_eq!(value["data"]["availableVariants"][0], "coding");
    }

    #[test]
    fn test_error_without_data() {
        let error = JsonRpcError::new(code::PARSE_ERROR, "Parse error");
        let json = serde_json::to_string(&error).unwrap();

        // data field should be omitted when None
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_method_not_found_message() {
        let error = JsonRpcError::method_not_found("tools/fly");
        assert_eq!(error.code, code::METHOD_NOT_FOUND);
        assert_eq!(error.message, "Method 'tools/fly' not found");
    }

    #[test]
    fn test_roundtrip_preserves_data() {
        let original = JsonRpcError::with_data(-32001, "custom", json!({"k": [1, 2, 3]}));
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: JsonRpcError = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }
}
