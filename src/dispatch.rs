//! Request dispatch to inner variant sessions.
//!
//! One dispatcher exists per front session (stateful mode) or per process
//! (stateless mode). It resolves the active variant for each routed request,
//! translates pagination cursors at the boundary, forwards to the matching
//! inner session, and enriches resolution-class errors with the active
//! variant id.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::backend::InnerConnection;
use crate::client::InnerSession;
use crate::error::{JsonRpcError, VariantGateError, code};
use crate::variant::VARIANT_META_KEY;
use crate::variant::cursor::{unwrap_cursor, wrap_cursor};

/// Routes requests to inner variant sessions.
#[derive(Debug)]
pub struct Dispatcher {
    /// variant id → inner connection
    connections: HashMap<String, InnerConnection>,
    /// Ranked variant ids cached at initialize time. Index 0 is the session
    /// default; the whole list is the `availableVariants` error payload.
    ranking: Vec<String>,
    /// Subscribed resource URI → owning variant id.
    subscriptions: Mutex<HashMap<String, String>>,
}

impl Dispatcher {
    /// Build a dispatcher over the given connections with the session's
    /// ranked id list.
    pub fn new(connections: HashMap<String, InnerConnection>, ranking: Vec<String>) -> Self {
        Self {
            connections,
            ranking,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// The ranked variant ids this session defaults to.
    pub fn ranking(&self) -> &[String] {
        &self.ranking
    }

    /// The variant a subscription URI is bound to, if any.
    pub fn subscription_variant(&self, uri: &str) -> Option<String> {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .get(uri)
            .cloned()
    }

    /// Close every inner connection owned by this dispatcher.
    pub(crate) fn close_connections(&self) {
        for connection in self.connections.values() {
            connection.close();
        }
    }

    /// Dispatch a routed method. Returns `None` for methods the dispatcher
    /// does not own; those fall through to the front server's default
    /// handlers, so `ping` never reaches an inner session.
    pub async fn dispatch(
        &self,
        method: &str,
        params: Option<&Value>,
    ) -> Option<Result<Value, JsonRpcError>> {
        match method {
            "tools/list" | "resources/list" | "prompts/list" | "resources/templates/list" => {
                Some(self.handle_list(method, params).await)
            }
            "tools/call" | "resources/read" | "prompts/get" => {
                Some(self.handle_call(method, params).await)
            }
            "resources/subscribe" => Some(self.handle_subscribe(params).await),
            "resources/unsubscribe" => Some(self.handle_unsubscribe(params).await),
            "completion/complete" => Some(self.handle_completion(params).await),
            _ => None,
        }
    }

    /// Resolve the active variant for a request: the `_meta` selector when
    /// present, otherwise the session default (rank index 0).
    fn resolve(
        &self,
        params: Option<&Value>,
    ) -> Result<(&str, &InnerSession), JsonRpcError> {
        let requested = variant_id_from_meta(params);

        let variant_id = match requested {
            Some(id) => id.to_string(),
            None => self
                .ranking
                .first()
                .cloned()
                .ok_or_else(|| JsonRpcError::internal("no variants available"))?,
        };

        match self.connections.get_key_value(&variant_id) {
            Some((id, connection)) => Ok((id.as_str(), &connection.session)),
            None => Err(VariantGateError::InvalidVariant {
                requested: variant_id,
                available: self.ranking.clone(),
            }
            .into()),
        }
    }

    // -----------------------------------------------------------------------
    // List methods
    // -----------------------------------------------------------------------

    /// Forward a list method, unwrapping the request cursor against the
    /// active variant and wrapping any `nextCursor` on the way out.
    async fn handle_list(
        &self,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, JsonRpcError> {
        let (variant_id, session) = self.resolve(params)?;

        let mut forwarded = params.cloned();
        if let Some(cursor) = cursor_from_params(params) {
            let inner = unwrap_cursor(cursor, variant_id).map_err(JsonRpcError::from)?;
            let object = forwarded
                .get_or_insert_with(|| json!({}))
                .as_object_mut()
                .ok_or_else(|| {
                    JsonRpcError::invalid_params(format!("invalid {method} params"))
                })?;
            if inner.is_empty() {
                object.remove("cursor");
            } else {
                object.insert("cursor".to_string(), Value::String(inner));
            }
        }

        debug!(method, variant = variant_id, "dispatching list");
        let mut result = session
            .request(method, forwarded)
            .await
            .map_err(|e| enrich_error(e, variant_id))?;

        let next = result
            .get("nextCursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if let Some(next) = next {
            result["nextCursor"] = Value::String(wrap_cursor(&next, variant_id));
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Call methods
    // -----------------------------------------------------------------------

    /// Forward `tools/call`, `resources/read` or `prompts/get`.
    async fn handle_call(
        &self,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, JsonRpcError> {
        let (variant_id, session) = self.resolve(params)?;

        let required_key = match method {
            "tools/call" | "prompts/get" => "name",
            _ => "uri",
        };
        require_string_param(params, required_key, method)?;

        debug!(method, variant = variant_id, "dispatching call");
        session
            .request(method, params.cloned())
            .await
            .map_err(|e| enrich_error(e, variant_id))
    }

    // -----------------------------------------------------------------------
    // Subscription methods
    // -----------------------------------------------------------------------

    async fn handle_subscribe(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let (variant_id, session) = self.resolve(params)?;
        let uri = require_string_param(params, "uri", "resources/subscribe")?;

        let result = session
            .request("resources/subscribe", params.cloned())
            .await
            .map_err(|e| enrich_error(e, variant_id))?;

        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .insert(uri, variant_id.to_string());
        Ok(result)
    }

    /// Unsubscribe stays accepted for subscription URIs whose resource has
    /// since disappeared from the variant; the binding is dropped either way.
    async fn handle_unsubscribe(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let (variant_id, session) = self.resolve(params)?;
        let uri = require_string_param(params, "uri", "resources/unsubscribe")?;

        let result = session
            .request("resources/unsubscribe", params.cloned())
            .await
            .map_err(|e| enrich_error(e, variant_id));

        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .remove(&uri);
        result
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    async fn handle_completion(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let (variant_id, session) = self.resolve(params)?;
        if params.and_then(Value::as_object).is_none() {
            return Err(JsonRpcError::invalid_params(
                "missing or invalid completion/complete params",
            ));
        }
        session
            .request("completion/complete", params.cloned())
            .await
            .map_err(|e| enrich_error(e, variant_id))
    }
}

/// Extract the variant selector from a request's `_meta`, if present.
/// Non-string values are ignored, matching clients that send garbage there.
pub(crate) fn variant_id_from_meta(params: Option<&Value>) -> Option<&str> {
    params?
        .get("_meta")?
        .get(VARIANT_META_KEY)?
        .as_str()
}

/// Extract a request cursor, if present and non-empty.
fn cursor_from_params(params: Option<&Value>) -> Option<&str> {
    let cursor = params?.get("cursor")?.as_str()?;
    (!cursor.is_empty()).then_some(cursor)
}

/// Validate that `params[key]` is a non-empty string and return it.
fn require_string_param(
    params: Option<&Value>,
    key: &str,
    method: &str,
) -> Result<String, JsonRpcError> {
    params
        .and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            JsonRpcError::invalid_params(format!("missing or invalid {method} params"))
        })
}

/// Add `activeVariant` to an error's data for variant-scoped resolution
/// failures (unknown tool/prompt/resource, invalid cursor, invalid
/// subscription context).
///
/// Only errors with codes -32602 (invalid params) or -32601 (method not
/// found) are enriched; business-logic errors from tool execution pass
/// through unmodified. A new error object is built with a merged data map;
/// the incoming object is never reused.
pub(crate) fn enrich_error(error: JsonRpcError, variant_id: &str) -> JsonRpcError {
    match error.code {
        code::INVALID_PARAMS | code::METHOD_NOT_FOUND => {}
        _ => return error,
    }

    let mut data = match &error.data {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    data.insert(
        "activeVariant".to_string(),
        Value::String(variant_id.to_string()),
    );

    JsonRpcError::with_data(error.code, error.message.clone(), Value::Object(data))
}
