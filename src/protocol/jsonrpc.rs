//! JSON-RPC 2.0 types and parsing.
//!
//! # JSON-RPC 2.0 Compliance
//!
//! - Requests have `id`, `method`, and optional `params`
//! - Notifications are requests without `id`
//! - Batches are arrays of requests/notifications
//! - `id` type (string or integer) MUST be preserved in responses
//!
//! # Security Note
//!
//! This module parses untrusted input. All parsing is done with size limits
//! enforced at the transport layer.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{JsonRpcError, VariantGateError};

/// JSON-RPC 2.0 version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request ID.
///
/// JSON-RPC 2.0 allows string or integer IDs. The exact type is preserved so
/// responses use the same type as requests: if the client sends `"id": 1`,
/// respond with `"id": 1`, not `"id": "1"`.
///
/// Per JSON-RPC 2.0, `"id": null` is valid (though unusual) and should be
/// echoed back in responses. This is distinct from a missing `id` field,
/// which indicates a notification that requires no response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID (e.g., `"id": null`) - valid but unusual
    Null,
}

impl JsonRpcId {
    /// Returns the integer value for numeric IDs.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonRpcId::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(JsonRpcId::Number(i))
                } else {
                    Err(serde::de::Error::custom(
                        "JSON-RPC ID must be integer, not float",
                    ))
                }
            }
            Value::String(s) => Ok(JsonRpcId::String(s)),
            Value::Null => Ok(JsonRpcId::Null),
            _ => Err(serde::de::Error::custom(
                "JSON-RPC ID must be string, integer, or null",
            )),
        }
    }
}

/// Wrapper to distinguish between missing field and explicit null.
/// - `Absent` - field was not present in JSON
/// - `Null` - field was present with value `null`
/// - `Present(T)` - field was present with a non-null value
#[derive(Debug, Clone, Default)]
enum MaybeNull<T> {
    #[default]
    Absent,
    Null,
    Present(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeNull<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            Ok(MaybeNull::Null)
        } else {
            T::deserialize(value)
                .map(MaybeNull::Present)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// Deserializer that converts MaybeNull<JsonRpcId> to Option<JsonRpcId>
/// where explicit null becomes Some(JsonRpcId::Null)
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<JsonRpcId>, D::Error>
where
    D: Deserializer<'de>,
{
    match MaybeNull::deserialize(deserializer)? {
        MaybeNull::Absent => Ok(None),
        MaybeNull::Null => Ok(Some(JsonRpcId::Null)),
        MaybeNull::Present(id) => Ok(Some(id)),
    }
}

/// Raw JSON-RPC 2.0 request as received from the wire.
///
/// This struct handles the wire format before validation. All fields are
/// optional to allow for proper error reporting on malformed requests.
#[derive(Debug, Clone, Deserialize)]
struct RawJsonRpcRequest {
    /// Must be "2.0"
    jsonrpc: Option<String>,
    /// Request ID (absent for notifications, Some(Null) for explicit null)
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<JsonRpcId>,
    /// Method name
    method: Option<String>,
    /// Method parameters
    params: Option<Value>,
}

/// Validated JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request ID (None for notifications)
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<JsonRpcId>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request with the given id.
    pub fn new(id: JsonRpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Returns true if this is a notification (no ID).
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request ID (must match the request)
    pub id: Option<JsonRpcId>,
    /// Result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns true if this is an error response.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A JSON-RPC message travelling over an in-memory transport: either a
/// request/notification or a response.
///
/// Untagged: requests are tried first because they require a `method` field,
/// which responses never carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request or notification.
    Request(JsonRpcRequest),
    /// A response.
    Response(JsonRpcResponse),
}

/// Parsed and validated request with internal tracking.
///
/// This is the internal representation used after parsing. It includes
/// metadata for tracing and correlation.
#[derive(Debug, Clone)]
pub struct McpRequest {
    /// Original JSON-RPC ID (None for notifications)
    pub id: Option<JsonRpcId>,
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Option<Value>,
    /// Timestamp when the request was received
    pub received_at: Instant,
    /// Unique correlation ID for tracing
    pub correlation_id: Uuid,
}

impl McpRequest {
    /// Returns true if this is a notification (no ID).
    ///
    /// Notifications do not receive responses per JSON-RPC 2.0.
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl From<JsonRpcRequest> for McpRequest {
    fn from(req: JsonRpcRequest) -> Self {
        Self {
            id: req.id,
            method: req.method,
            params: req.params,
            received_at: Instant::now(),
            correlation_id: Uuid::new_v4(),
        }
    }
}

/// Parse result that can be a single request or a batch.
#[derive(Debug)]
pub enum ParsedRequests {
    /// Single request
    Single(McpRequest),
    /// Batch of requests
    Batch(Vec<McpRequest>),
}

/// Parse JSON bytes into JSON-RPC 2.0 request(s).
///
/// # Returns
///
/// * `Ok(ParsedRequests)` - Successfully parsed request(s)
/// * `Err(VariantGateError::ParseError)` - Malformed JSON (-32700)
/// * `Err(VariantGateError::InvalidRequest)` - Invalid JSON-RPC structure (-32600)
pub fn parse_jsonrpc(bytes: &[u8]) -> Result<ParsedRequests, VariantGateError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| VariantGateError::ParseError {
            details: format!("Invalid JSON: {e}"),
        })?;

    match value {
        Value::Array(arr) => {
            if arr.is_empty() {
                return Err(VariantGateError::InvalidRequest {
                    details: "Empty batch is not allowed".to_string(),
                });
            }
            let mut requests = Vec::with_capacity(arr.len());
            for item in arr {
                requests.push(parse_single_request(item)?);
            }
            Ok(ParsedRequests::Batch(requests))
        }
        Value::Object(_) => Ok(ParsedRequests::Single(parse_single_request(value)?)),
        _ => Err(VariantGateError::InvalidRequest {
            details: "Request must be an object or array".to_string(),
        }),
    }
}

/// Parse a single JSON-RPC 2.0 request from a JSON value.
fn parse_single_request(value: Value) -> Result<McpRequest, VariantGateError> {
    let raw: RawJsonRpcRequest =
        serde_json::from_value(value).map_err(|e| VariantGateError::InvalidRequest {
            details: format!("Invalid JSON-RPC structure: {e}"),
        })?;

    match raw.jsonrpc.as_deref() {
        Some(JSONRPC_VERSION) => {}
        Some(v) => {
            return Err(VariantGateError::InvalidRequest {
                details: format!("Invalid jsonrpc version: expected \"2.0\", got \"{v}\""),
            });
        }
        None => {
            return Err(VariantGateError::InvalidRequest {
                details: "Missing required field: jsonrpc".to_string(),
            });
        }
    }

    let method = raw.method.ok_or_else(|| VariantGateError::InvalidRequest {
        details: "Missing required field: method".to_string(),
    })?;

    Ok(McpRequest {
        id: raw.id,
        method,
        params: raw.params,
        received_at: Instant::now(),
        correlation_id: Uuid::new_v4(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_single_request() {
        let json = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"test"}}"#;
        let result = parse_jsonrpc(json);
        assert!(result.is_ok());

        if let ParsedRequests::Single(req) = result.expect("should parse") {
            assert_eq!(req.id, Some(JsonRpcId::Number(1)));
            assert_eq!(req.method, "tools/call");
            assert!(!req.is_notification());
            assert!(req.params.is_some());
        } else {
            panic!("Expected single request");
        }
    }

    #[test]
    fn test_parse_notification() {
        let json = br#"{"jsonrpc":"2.0","method":"notifications/progress"}"#;
        let result = parse_jsonrpc(json);

        if let ParsedRequests::Single(req) = result.expect("should parse") {
            assert!(req.is_notification());
            assert_eq!(req.id, None);
            assert_eq!(req.method, "notifications/progress");
        } else {
            panic!("Expected single request");
        }
    }

    #[test]
    fn test_parse_batch() {
        let json =
            br#"[{"jsonrpc":"2.0","id":1,"method":"a"},{"jsonrpc":"2.0","id":2,"method":"b"}]"#;
        let result = parse_jsonrpc(json);

        if let ParsedRequests::Batch(reqs) = result.expect("should parse") {
            assert_eq!(reqs.len(), 2);
            assert_eq!(reqs[0].method, "a");
            assert_eq!(reqs[1].method, "b");
        } else {
            panic!("Expected batch");
        }
    }

    #[test]
    fn test_parse_empty_batch_error() {
        let result = parse_jsonrpc(br#"[]"#);
        assert!(matches!(
            result,
            Err(VariantGateError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_parse_malformed_json_error() {
        let result = parse_jsonrpc(br#"{"invalid json"#);
        assert!(matches!(result, Err(VariantGateError::ParseError { .. })));
    }

    #[test]
    fn test_parse_missing_jsonrpc_field() {
        let result = parse_jsonrpc(br#"{"id":1,"method":"test"}"#);
        assert!(matches!(
            result,
            Err(VariantGateError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_preserve_integer_id() {
        let json = br#"{"jsonrpc":"2.0","id":42,"method":"test"}"#;
        let result = parse_jsonrpc(json);

        if let Ok(ParsedRequests::Single(req)) = result {
            assert_eq!(req.id, Some(JsonRpcId::Number(42)));

            let response = JsonRpcResponse::success(req.id, serde_json::json!({}));
            let serialized = serde_json::to_string(&response).expect("should serialize");
            assert!(serialized.contains("\"id\":42"));
            assert!(!serialized.contains("\"id\":\"42\""));
        } else {
            panic!("Expected single request with integer ID");
        }
    }

    #[test]
    fn test_preserve_string_id() {
        let json = br#"{"jsonrpc":"2.0","id":"abc-123","method":"test"}"#;
        let result = parse_jsonrpc(json);

        if let Ok(ParsedRequests::Single(req)) = result {
            assert_eq!(req.id, Some(JsonRpcId::String("abc-123".to_string())));
        } else {
            panic!("Expected single request with string ID");
        }
    }

    #[test]
    fn test_null_id_is_not_notification() {
        let json = br#"{"jsonrpc":"2.0","id":null,"method":"test"}"#;
        let result = parse_jsonrpc(json);

        if let Ok(ParsedRequests::Single(req)) = result {
            assert_eq!(req.id, Some(JsonRpcId::Null));
            assert!(!req.is_notification());
        } else {
            panic!("Expected request with null ID");
        }
    }

    #[test]
    fn test_float_id_rejected() {
        let result = parse_jsonrpc(br#"{"jsonrpc":"2.0","id":1.5,"method":"test"}"#);
        assert!(matches!(
            result,
            Err(VariantGateError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_invalid_jsonrpc_version() {
        let result = parse_jsonrpc(br#"{"jsonrpc":"1.0","id":1,"method":"test"}"#);
        assert!(matches!(
            result,
            Err(VariantGateError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_message_enum_distinguishes_request_and_response() {
        let req: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(_)));

        let resp: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(matches!(resp, JsonRpcMessage::Response(_)));

        let err: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        match err {
            JsonRpcMessage::Response(r) => assert!(r.is_error()),
            JsonRpcMessage::Request(_) => panic!("error response parsed as request"),
        }
    }

    #[test]
    fn test_response_serialization() {
        let response = JsonRpcResponse::success(
            Some(JsonRpcId::Number(1)),
            serde_json::json!({"result": "ok"}),
        );

        let serialized = serde_json::to_string(&response).expect("should serialize");
        assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
        assert!(serialized.contains("\"id\":1"));
        assert!(serialized.contains("\"result\""));
        assert!(!serialized.contains("\"error\""));
    }

    #[test]
    fn test_correlation_id_generated() {
        let result = parse_jsonrpc(br#"{"jsonrpc":"2.0","id":1,"method":"test"}"#);

        if let Ok(ParsedRequests::Single(req)) = result {
            assert!(!req.correlation_id.is_nil());
        } else {
            panic!("Expected single request");
        }
    }
}
