//! Error handling for variantgate.
//!
//! All errors that can occur inside the proxy are modelled by
//! [`VariantGateError`]. Errors that reach the wire are converted into
//! [`JsonRpcError`] objects via [`VariantGateError::to_jsonrpc_error`], which
//! attaches the structured `data` payloads the variants extension defines
//! (requested/available variants, cursor provenance).
//!
//! Construction-time errors (duplicate variant ids, empty registries) are
//! caller bugs and panic instead; they never appear here.

pub mod jsonrpc;

pub use jsonrpc::{JsonRpcError, code};

use serde_json::json;
use thiserror::Error;

/// All error types that can occur in variantgate.
///
/// Each variant maps to a specific JSON-RPC error code and provides
/// structured error information for clients.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VariantGateError {
    /// Invalid JSON in a request body.
    #[error("Invalid JSON: {details}")]
    ParseError {
        /// Description of the parse error
        details: String,
    },

    /// Request is not a valid JSON-RPC 2.0 message.
    #[error("Invalid JSON-RPC request: {details}")]
    InvalidRequest {
        /// Description of what makes the request invalid
        details: String,
    },

    /// The requested method does not exist.
    #[error("Method '{method}' not found")]
    MethodNotFound {
        /// The method name that was not found
        method: String,
    },

    /// The method parameters are invalid.
    #[error("Invalid parameters: {details}")]
    InvalidParams {
        /// Description of the parameter validation failure
        details: String,
    },

    /// A request selected a variant id that is not registered.
    #[error("Invalid server variant '{requested}'")]
    InvalidVariant {
        /// The variant id the client asked for
        requested: String,
        /// Registered variant ids, in rank order
        available: Vec<String>,
    },

    /// A pagination cursor could not be decoded.
    #[error("Invalid cursor format")]
    InvalidCursor,

    /// A pagination cursor was replayed against a different variant.
    #[error("Cursor invalid for requested variant")]
    CursorVariantMismatch {
        /// The variant the cursor was issued under
        cursor_variant: String,
        /// The variant the request resolved to
        requested_variant: String,
    },

    /// A backend failed to open an inner session during initialize.
    #[error("Failed to connect variant '{variant}': {reason}")]
    ConnectFailed {
        /// The variant whose backend failed
        variant: String,
        /// Reason for the connection failure
        reason: String,
    },

    /// The inner session's transport went away mid-request.
    #[error("Inner connection closed: {details}")]
    ConnectionClosed {
        /// What was in flight when the connection dropped
        details: String,
    },

    /// Assembly-time configuration problem (empty registry, bad options).
    #[error("Configuration error: {details}")]
    ConfigurationError {
        /// Description of the configuration error
        details: String,
    },

    /// I/O failure on a front transport.
    #[error("Transport I/O error: {details}")]
    Io {
        /// The underlying I/O error text
        details: String,
    },

    /// Internal error - should not happen.
    #[error("Internal error. Reference: {correlation_id}")]
    Internal {
        /// Correlation ID for debugging
        correlation_id: String,
    },
}

impl VariantGateError {
    /// Maps the error to a JSON-RPC 2.0 error code.
    ///
    /// Standard JSON-RPC codes only: the variants extension deliberately
    /// reuses -32602 for selection and cursor failures so that unaware
    /// clients treat them as ordinary parameter errors.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::ParseError { .. } => code::PARSE_ERROR,
            Self::InvalidRequest { .. } => code::INVALID_REQUEST,
            Self::MethodNotFound { .. } => code::METHOD_NOT_FOUND,
            Self::InvalidParams { .. }
            | Self::InvalidVariant { .. }
            | Self::InvalidCursor
            | Self::CursorVariantMismatch { .. } => code::INVALID_PARAMS,
            Self::ConnectFailed { .. }
            | Self::ConnectionClosed { .. }
            | Self::ConfigurationError { .. }
            | Self::Io { .. }
            | Self::Internal { .. } => code::INTERNAL_ERROR,
        }
    }

    /// Returns the error type name for metrics and logging.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::InvalidVariant { .. } => "invalid_variant",
            Self::InvalidCursor => "invalid_cursor",
            Self::CursorVariantMismatch { .. } => "cursor_variant_mismatch",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::ConfigurationError { .. } => "configuration_error",
            Self::Io { .. } => "io_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Convert into the wire-level error object, attaching the structured
    /// `data` payloads defined by the variants extension.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::InvalidVariant {
                requested,
                available,
            } => JsonRpcError::with_data(
                code::INVALID_PARAMS,
                "Invalid server variant",
                json!({
                    "requestedVariant": requested,
                    "availableVariants": available,
                }),
            ),
            Self::InvalidCursor => {
                JsonRpcError::new(code::INVALID_PARAMS, "Invalid cursor format")
            }
            Self::CursorVariantMismatch {
                cursor_variant,
                requested_variant,
            } => JsonRpcError::with_data(
                code::INVALID_PARAMS,
                "Cursor invalid for requested variant",
                json!({
                    "cursorVariant": cursor_variant,
                    "requestedVariant": requested_variant,
                }),
            ),
            other => JsonRpcError::new(other.to_jsonrpc_code(), other.to_string()),
        }
    }
}

impl From<VariantGateError> for JsonRpcError {
    fn from(err: VariantGateError) -> Self {
        err.to_jsonrpc_error()
    }
}

impl From<std::io::Error> for VariantGateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        let cases = [
            (
                VariantGateError::ParseError {
                    details: "x".into(),
                },
                -32700,
            ),
            (
                VariantGateError::InvalidRequest {
                    details: "x".into(),
                },
                -32600,
            ),
            (
                VariantGateError::MethodNotFound {
                    method: "tools/fly".into(),
                },
                -32601,
            ),
            (
                VariantGateError::InvalidParams {
                    details: "x".into(),
                },
                -32602,
            ),
            (VariantGateError::InvalidCursor, -32602),
            (
                VariantGateError::Internal {
                    correlation_id: "c".into(),
                },
                -32603,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_jsonrpc_code(), expected, "{err}");
        }
    }

    #[test]
    fn test_invalid_variant_data_payload() {
        let err = VariantGateError::InvalidVariant {
            requested: "nonexistent".into(),
            available: vec!["coding".into(), "compact".into()],
        };
        let wire = err.to_jsonrpc_error();

        assert_eq!(wire.code, -32602);
        assert_eq!(wire.message, "Invalid server variant");
        let data = wire.data.unwrap();
        assert_eq!(data["requestedVariant"], "nonexistent");
        assert_eq!(
            data["availableVariants"],
            serde_json::json!(["coding", "compact"])
        );
    }

    #[test]
    fn test_cursor_mismatch_data_payload() {
        let err = VariantGateError::CursorVariantMismatch {
            cursor_variant: "coding".into(),
            requested_variant: "compact".into(),
        };
        let wire = err.to_jsonrpc_error();

        assert_eq!(wire.code, -32602);
        assert_eq!(wire.message, "Cursor invalid for requested variant");
        let data = wire.data.unwrap();
        assert_eq!(data["cursorVariant"], "coding");
        assert_eq!(data["requestedVariant"], "compact");
    }

    #[test]
    fn test_plain_errors_have_no_data() {
        let err = VariantGateError::MethodNotFound {
            method: "tools/fly".into(),
        };
        let wire = err.to_jsonrpc_error();
        assert_eq!(wire.code, -32601);
        assert!(wire.data.is_none());
    }

    #[test]
    fn test_error_type_names_are_stable() {
        assert_eq!(
            VariantGateError::InvalidCursor.error_type_name(),
            "invalid_cursor"
        );
        assert_eq!(
            VariantGateError::ConnectFailed {
                variant: "coding".into(),
                reason: "boom".into()
            }
            .error_type_name(),
            "connect_failed"
        );
    }
}
