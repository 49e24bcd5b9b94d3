//! Proxy-side client session to one inner server.
//!
//! [`InnerSession`] owns one half of an in-memory transport: it performs the
//! initialize handshake, matches responses to requests by id, and dispatches
//! asynchronous notifications from the inner server to the handlers the
//! backend installed.
//!
//! Inner error responses surface verbatim as [`JsonRpcError`] so the
//! dispatcher can decide what to enrich and what to pass through untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{JsonRpcError, VariantGateError};
use crate::protocol::{
    ClientCapabilities, Implementation, InitializeResult, JsonRpcId, JsonRpcMessage,
    JsonRpcRequest, JsonRpcResponse, LATEST_PROTOCOL_VERSION, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, LoggingMessageParams,
    ProgressNotificationParams,
};
use crate::transport::memory::MemoryTransport;

/// Handlers invoked for notifications arriving from the inner server.
///
/// Absent handlers absorb their notifications. `other` is the hook for
/// list-changed and resource-updated notifications; it defaults to a no-op
/// because there is currently no path to re-emit them on the front session.
#[derive(Clone, Default)]
pub struct NotificationHandlers {
    /// `notifications/progress`
    pub progress: Option<Arc<dyn Fn(ProgressNotificationParams) + Send + Sync>>,
    /// `notifications/message`
    pub logging: Option<Arc<dyn Fn(LoggingMessageParams) + Send + Sync>>,
    /// Any other notification (list-changed, resource-updated, ...):
    /// receives the method name and raw params.
    pub other: Option<Arc<dyn Fn(&str, Option<Value>) + Send + Sync>>,
}

/// Shared plumbing between the session handle and its reader task.
struct SessionCore {
    outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    pending: DashMap<i64, oneshot::Sender<JsonRpcResponse>>,
    next_id: AtomicI64,
    closed: std::sync::atomic::AtomicBool,
}

impl SessionCore {
    /// Issue a request and await its response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error(method));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = JsonRpcRequest::new(JsonRpcId::Number(id), method, params);
        if self
            .outbound
            .send(JsonRpcMessage::Request(request))
            .is_err()
        {
            self.pending.remove(&id);
            return Err(closed_error(method));
        }

        // Dropping `rx` on cancellation leaves a stale pending entry; the
        // reader clears it when (if) the response arrives.
        match rx.await {
            Ok(response) => match (response.result, response.error) {
                (_, Some(error)) => Err(error),
                (Some(result), None) => Ok(result),
                (None, None) => Ok(Value::Null),
            },
            Err(_) => Err(closed_error(method)),
        }
    }

    fn notify(&self, method: &str, params: Option<Value>) {
        let _ = self
            .outbound
            .send(JsonRpcMessage::Request(JsonRpcRequest::notification(
                method, params,
            )));
    }
}

fn closed_error(method: &str) -> JsonRpcError {
    JsonRpcError::internal(format!("inner connection closed during {method}"))
}

/// A live client session to one inner server.
///
/// Cloning shares the underlying transport; `close()` on any clone tears the
/// session down for all of them.
#[derive(Clone)]
pub struct InnerSession {
    core: Arc<SessionCore>,
    init_result: Arc<InitializeResult>,
    reader: Arc<JoinHandle<()>>,
}

impl InnerSession {
    /// Connect over the given transport: spawns the reader, performs the
    /// initialize handshake, and sends `notifications/initialized`.
    pub async fn connect(
        transport: MemoryTransport,
        handlers: NotificationHandlers,
        client_info: Implementation,
    ) -> Result<Self, VariantGateError> {
        let (outbound, inbound) = transport.into_split();
        let core = Arc::new(SessionCore {
            outbound,
            pending: DashMap::new(),
            next_id: AtomicI64::new(1),
            closed: std::sync::atomic::AtomicBool::new(false),
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&core), inbound, handlers));

        let params = serde_json::json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": ClientCapabilities::default(),
            "clientInfo": client_info,
        });
        let raw = core
            .request("initialize", Some(params))
            .await
            .map_err(|e| {
                reader.abort();
                VariantGateError::ConnectionClosed {
                    details: format!("initialize handshake failed: {e}"),
                }
            })?;
        let init_result: InitializeResult = serde_json::from_value(raw).map_err(|e| {
            reader.abort();
            VariantGateError::ConnectionClosed {
                details: format!("malformed initialize result: {e}"),
            }
        })?;
        core.notify("notifications/initialized", None);

        debug!(server = %init_result.server_info.name, "inner session established");

        Ok(Self {
            core,
            init_result: Arc::new(init_result),
            reader: Arc::new(reader),
        })
    }

    /// The initialize result captured during the handshake.
    pub fn initialize_result(&self) -> &InitializeResult {
        &self.init_result
    }

    /// Issue a raw request. Inner error responses come back as `Err`
    /// verbatim.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, JsonRpcError> {
        self.core.request(method, params).await
    }

    /// Send a notification to the inner server.
    pub fn notify(&self, method: &str, params: Option<Value>) {
        self.core.notify(method, params);
    }

    /// `tools/list`
    pub async fn list_tools(
        &self,
        params: Option<Value>,
    ) -> Result<ListToolsResult, JsonRpcError> {
        self.typed("tools/list", params).await
    }

    /// `resources/list`
    pub async fn list_resources(
        &self,
        params: Option<Value>,
    ) -> Result<ListResourcesResult, JsonRpcError> {
        self.typed("resources/list", params).await
    }

    /// `resources/templates/list`
    pub async fn list_resource_templates(
        &self,
        params: Option<Value>,
    ) -> Result<ListResourceTemplatesResult, JsonRpcError> {
        self.typed("resources/templates/list", params).await
    }

    /// `prompts/list`
    pub async fn list_prompts(
        &self,
        params: Option<Value>,
    ) -> Result<ListPromptsResult, JsonRpcError> {
        self.typed("prompts/list", params).await
    }

    async fn typed<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, JsonRpcError> {
        let raw = self.request(method, params).await?;
        serde_json::from_value(raw)
            .map_err(|e| JsonRpcError::internal(format!("malformed {method} result: {e}")))
    }

    /// Tear the session down. In-flight requests fail with an internal
    /// connection-closed error. Idempotent.
    pub fn close(&self) {
        self.core
            .closed
            .store(true, std::sync::atomic::Ordering::Release);
        self.reader.abort();
        self.core.pending.clear();
    }

    /// True once the session has been closed or its reader has exited.
    pub fn is_closed(&self) -> bool {
        self.core.closed.load(std::sync::atomic::Ordering::Acquire)
            || self.reader.is_finished()
    }
}

/// Reader: routes responses to their waiting requests and notifications to
/// the installed handlers.
async fn read_loop(
    core: Arc<SessionCore>,
    mut inbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    handlers: NotificationHandlers,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            JsonRpcMessage::Response(response) => {
                let Some(id) = response.id.as_ref().and_then(JsonRpcId::as_i64) else {
                    warn!("inner response without numeric id dropped");
                    continue;
                };
                if let Some((_, waiter)) = core.pending.remove(&id) {
                    // The requester may have been cancelled; dropping the
                    // response is correct then.
                    let _ = waiter.send(response);
                }
            }
            JsonRpcMessage::Request(request) if request.is_notification() => {
                dispatch_notification(&handlers, request);
            }
            JsonRpcMessage::Request(request) => {
                // Server-to-client requests (sampling, roots) are not part
                // of the proxied surface.
                let error = JsonRpcError::method_not_found(&request.method);
                let _ = core.outbound.send(JsonRpcMessage::Response(
                    JsonRpcResponse::error(request.id, error),
                ));
            }
        }
    }
}

fn dispatch_notification(handlers: &NotificationHandlers, request: JsonRpcRequest) {
    match request.method.as_str() {
        "notifications/progress" => {
            if let Some(handler) = &handlers.progress {
                match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
                    Ok(params) => handler(params),
                    Err(e) => warn!(error = %e, "malformed progress notification dropped"),
                }
            }
        }
        "notifications/message" => {
            if let Some(handler) = &handlers.logging {
                match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
                    Ok(params) => handler(params),
                    Err(e) => warn!(error = %e, "malformed logging notification dropped"),
                }
            }
        }
        other => {
            if let Some(handler) = &handlers.other {
                handler(other, request.params);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::{CallToolResult, Tool};
    use crate::service::McpService;
    use crate::transport::memory::memory_pair;
    use serde_json::json;

    async fn connected_session(service: Arc<McpService>) -> (InnerSession, crate::service::ServiceHandle) {
        let (proxy_side, server_side) = memory_pair();
        let handle = service.serve(server_side);
        let session = InnerSession::connect(
            proxy_side,
            NotificationHandlers::default(),
            Implementation::new("test-client", "0.0.1"),
        )
        .await
        .expect("connect");
        (session, handle)
    }

    fn echo_service() -> Arc<McpService> {
        Arc::new(
            McpService::builder("echo-server", "1.0.0")
                .add_tool_fn(Tool::new("echo", "Echo"), |_ctx, args| {
                    Ok(CallToolResult::structured(args.unwrap_or(json!({}))))
                })
                .build(),
        )
    }

    #[tokio::test]
    async fn test_handshake_captures_initialize_result() {
        let (session, handle) = connected_session(echo_service()).await;
        let init = session.initialize_result();
        assert_eq!(init.server_info.name, "echo-server");
        assert!(init.capabilities.tools.is_some());
        session.close();
        handle.close();
    }

    #[tokio::test]
    async fn test_typed_list_and_raw_request() {
        let (session, handle) = connected_session(echo_service()).await;

        let tools = session.list_tools(None).await.unwrap();
        assert_eq!(tools.tools.len(), 1);
        assert_eq!(tools.tools[0].name, "echo");

        let result = session
            .request("tools/call", Some(json!({"name": "echo", "arguments": {"k": 2}})))
            .await
            .unwrap();
        assert_eq!(result["structuredContent"]["k"], 2);

        session.close();
        handle.close();
    }

    #[tokio::test]
    async fn test_inner_error_passes_through_verbatim() {
        let (session, handle) = connected_session(echo_service()).await;

        let err = session
            .request("tools/call", Some(json!({"name": "missing"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
        assert!(err.message.contains("missing"));

        session.close();
        handle.close();
    }

    #[tokio::test]
    async fn test_concurrent_requests_matched_by_id() {
        let (session, handle) = connected_session(echo_service()).await;

        let calls = (0..8).map(|i| {
            let session = session.clone();
            async move {
                session
                    .request(
                        "tools/call",
                        Some(json!({"name": "echo", "arguments": {"i": i}})),
                    )
                    .await
                    .map(|v| v["structuredContent"]["i"].as_i64().unwrap())
            }
        });
        let results = futures_util::future::join_all(calls).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), i as i64);
        }

        session.close();
        handle.close();
    }

    #[tokio::test]
    async fn test_progress_handler_receives_notifications() {
        let service = Arc::new(
            McpService::builder("worker", "1.0.0")
                .add_tool_fn(Tool::new("work", "Work"), |ctx, _args| {
                    ctx.notify_progress(1.0, Some(1.0), None);
                    Ok(CallToolResult::text("done"))
                })
                .build(),
        );

        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handlers = NotificationHandlers {
            progress: Some(Arc::new(move |params| {
                sink.lock().unwrap().push(params.progress);
            })),
            ..Default::default()
        };

        let (proxy_side, server_side) = memory_pair();
        let handle = service.serve(server_side);
        let session = InnerSession::connect(
            proxy_side,
            handlers,
            Implementation::new("test-client", "0.0.1"),
        )
        .await
        .unwrap();

        session
            .request(
                "tools/call",
                Some(json!({
                    "name": "work",
                    "arguments": {},
                    "_meta": {"progressToken": 1}
                })),
            )
            .await
            .unwrap();

        // The notification is sent before the response on the same channel,
        // so it has been dispatched by the time the call returns.
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);

        session.close();
        handle.close();
    }

    #[tokio::test]
    async fn test_requests_fail_after_close() {
        let (session, handle) = connected_session(echo_service()).await;
        handle.close();
        session.close();

        let err = session.request("tools/list", None).await.unwrap_err();
        assert_eq!(err.code, -32603);

        let tools = session.list_tools(None).await;
        assert!(tools.is_err());
    }
}
