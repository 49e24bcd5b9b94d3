//! Streamable HTTP front transport.
//!
//! # Endpoints
//!
//! - `POST /mcp`: JSON-RPC requests. In stateful mode, `initialize` opens a
//!   session and returns its id in the `Mcp-Session-Id` response header;
//!   every later request must echo the header.
//! - `GET /mcp`: SSE stream of forwarded notifications for the session
//!   named by the header (stateful mode only).
//! - `DELETE /mcp`: explicit session teardown.
//!
//! The `stateless` option maps straight through to the proxy core: inner
//! connections are shared process-wide, no session header is used, and
//! notifications are dropped.
//!
//! # Request Flow
//!
//! 1. Receive POST request at `/mcp`
//! 2. Check body size against limit
//! 3. Acquire semaphore permit (or return 503)
//! 4. Parse JSON-RPC request(s)
//! 5. Resolve the session context
//! 6. Return response(s)

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::VariantGateError;
use crate::notify::FrontSession;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ParsedRequests, parse_jsonrpc};
use crate::server::{FrontContext, ProxyCore, VariantServer};

/// Session id header, per the streamable HTTP transport.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Configuration for the HTTP front server.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Listen address (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Maximum concurrent requests
    pub max_concurrent_requests: usize,
    /// Share inner connections across all clients instead of creating them
    /// per session.
    pub stateless: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            max_concurrent_requests: 10000,
            stateless: false,
        }
    }
}

impl HttpServerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `VARIANTGATE_LISTEN` (default: "0.0.0.0:8080"): Listen address
    /// - `VARIANTGATE_MAX_REQUEST_BODY_BYTES` (default: 1048576): Max body size
    /// - `VARIANTGATE_MAX_CONCURRENT_REQUESTS` (default: 10000): Max concurrent requests
    /// - `VARIANTGATE_STATELESS` (default: false): "1" or "true" switches to
    ///   shared inner connections
    pub fn from_env() -> Self {
        let listen_addr =
            std::env::var("VARIANTGATE_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let max_body_size: usize = std::env::var("VARIANTGATE_MAX_REQUEST_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1024 * 1024);

        let max_concurrent_requests: usize = std::env::var("VARIANTGATE_MAX_CONCURRENT_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10000);

        let stateless = std::env::var("VARIANTGATE_STATELESS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            listen_addr,
            max_body_size,
            max_concurrent_requests,
            stateless,
        }
    }
}

/// Notification plumbing for one HTTP session: the sender cloned into the
/// session's inner connections, and the receiver parked until a GET claims
/// it for streaming.
struct SessionChannels {
    notify_tx: mpsc::UnboundedSender<JsonRpcRequest>,
    notify_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<JsonRpcRequest>>>,
}

/// Shared application state for the HTTP handlers.
struct HttpState {
    core: Arc<ProxyCore>,
    semaphore: Arc<Semaphore>,
    max_body_size: usize,
    channels: DashMap<Uuid, SessionChannels>,
}

/// The streamable HTTP front server.
pub struct StreamableHttpServer {
    config: HttpServerConfig,
    state: Arc<HttpState>,
}

impl StreamableHttpServer {
    /// Assemble the proxy and wrap it in an HTTP server. In stateless mode
    /// the shared inner connections are created here, exactly once.
    pub async fn new(
        server: VariantServer,
        config: HttpServerConfig,
    ) -> Result<Self, VariantGateError> {
        let core = Arc::new(server.assemble(config.stateless).await?);
        let state = Arc::new(HttpState {
            core,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            max_body_size: config.max_body_size,
            channels: DashMap::new(),
        });
        Ok(Self { config, state })
    }

    /// The axum router serving `/mcp`.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/mcp",
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .layer(DefaultBodyLimit::max(self.state.max_body_size))
            .with_state(Arc::clone(&self.state))
    }

    /// Run the server. Blocks until it is shut down.
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, stateless = self.state.core.is_stateless(), "variant proxy listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Release every session and the shared stateless state.
    pub async fn close(&self) {
        self.state.channels.clear();
        self.state.core.close().await;
    }
}

/// Handle POST /mcp requests.
async fn handle_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > state.max_body_size {
        let error = VariantGateError::InvalidRequest {
            details: format!(
                "Request body exceeds maximum size of {} bytes",
                state.max_body_size
            ),
        };
        return jsonrpc_error_response(StatusCode::OK, None, error);
    }

    let _permit = match state.semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Max concurrent requests reached, returning 503");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Service temporarily unavailable"}}"#,
            )
                .into_response();
        }
    };

    let parsed = match parse_jsonrpc(&body) {
        Ok(parsed) => parsed,
        Err(e) => return jsonrpc_error_response(StatusCode::OK, None, e),
    };

    let is_initialize = match &parsed {
        ParsedRequests::Single(request) => request.method == "initialize",
        ParsedRequests::Batch(requests) => requests.iter().any(|r| r.method == "initialize"),
    };

    // Resolve the session context.
    let (context, new_session) = if state.core.is_stateless() {
        (FrontContext::new(Uuid::new_v4(), None), None)
    } else if is_initialize {
        let session_id = Uuid::new_v4();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        state.channels.insert(
            session_id,
            SessionChannels {
                notify_tx: notify_tx.clone(),
                notify_rx: std::sync::Mutex::new(Some(notify_rx)),
            },
        );
        debug!(session = %session_id, "http session opened");
        (
            FrontContext::new(session_id, Some(FrontSession::new(session_id, notify_tx))),
            Some(session_id),
        )
    } else {
        match session_from_headers(&headers) {
            Ok(session_id) => {
                let Some(channels) = state.channels.get(&session_id) else {
                    return jsonrpc_error_response(
                        StatusCode::NOT_FOUND,
                        None,
                        VariantGateError::InvalidRequest {
                            details: format!("Unknown session: {session_id}"),
                        },
                    );
                };
                let front = FrontSession::new(session_id, channels.notify_tx.clone());
                (FrontContext::new(session_id, Some(front)), None)
            }
            Err(error) => return jsonrpc_error_response(StatusCode::BAD_REQUEST, None, error),
        }
    };

    // Process the request(s).
    let body = match parsed {
        ParsedRequests::Single(request) => {
            match state.core.handle(&context, request).await {
                Some(response) => Some(
                    serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string()),
                ),
                None => None,
            }
        }
        ParsedRequests::Batch(requests) => {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                if let Some(response) = state.core.handle(&context, request).await {
                    responses.push(response);
                }
            }
            if responses.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&responses).unwrap_or_else(|_| "[]".to_string()))
            }
        }
    };

    let mut response = match body {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        // Notifications produce no body.
        None => StatusCode::ACCEPTED.into_response(),
    };

    if let Some(session_id) = new_session {
        if let Ok(value) = session_id.to_string().parse() {
            response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
    }
    response
}

/// Handle GET /mcp: the session's SSE notification stream.
async fn handle_get(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    if state.core.is_stateless() {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let session_id = match session_from_headers(&headers) {
        Ok(session_id) => session_id,
        Err(error) => return jsonrpc_error_response(StatusCode::BAD_REQUEST, None, error),
    };

    let Some(channels) = state.channels.get(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let receiver = channels
        .notify_rx
        .lock()
        .expect("notify lock poisoned")
        .take();
    let Some(receiver) = receiver else {
        // A stream is already attached to this session.
        return StatusCode::CONFLICT.into_response();
    };

    let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
        let notification = receiver.recv().await?;
        let data = serde_json::to_string(&notification).unwrap_or_default();
        Some((
            Ok::<Event, Infallible>(Event::default().event("message").data(data)),
            receiver,
        ))
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Handle DELETE /mcp: explicit session teardown.
async fn handle_delete(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    if state.core.is_stateless() {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let session_id = match session_from_headers(&headers) {
        Ok(session_id) => session_id,
        Err(error) => return jsonrpc_error_response(StatusCode::BAD_REQUEST, None, error),
    };

    state.channels.remove(&session_id);
    state.core.close_session(session_id);
    debug!(session = %session_id, "http session deleted");
    StatusCode::NO_CONTENT.into_response()
}

fn session_from_headers(headers: &HeaderMap) -> Result<Uuid, VariantGateError> {
    let raw = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| VariantGateError::InvalidRequest {
            details: format!("Missing {SESSION_ID_HEADER} header"),
        })?;
    raw.parse().map_err(|_| VariantGateError::InvalidRequest {
        details: format!("Malformed {SESSION_ID_HEADER} header"),
    })
}

fn jsonrpc_error_response(
    status: StatusCode,
    id: Option<crate::protocol::JsonRpcId>,
    error: VariantGateError,
) -> Response {
    let body = JsonRpcResponse::error(id, error.to_jsonrpc_error());
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.max_body_size, 1024 * 1024);
        assert_eq!(config.max_concurrent_requests, 10000);
        assert!(!config.stateless);
    }

    #[test]
    fn test_config_from_env() {
        // SAFETY: tests in this module run serially on one thread; env var
        // mutation is isolated.
        unsafe {
            std::env::set_var("VARIANTGATE_LISTEN", "127.0.0.1:9191");
            std::env::set_var("VARIANTGATE_MAX_REQUEST_BODY_BYTES", "2048");
            std::env::set_var("VARIANTGATE_STATELESS", "true");
        }

        let config = HttpServerConfig::from_env();
        assert_eq!(config.listen_addr, "127.0.0.1:9191");
        assert_eq!(config.max_body_size, 2048);
        assert!(config.stateless);

        // SAFETY: cleanup of the vars set above.
        unsafe {
            std::env::remove_var("VARIANTGATE_LISTEN");
            std::env::remove_var("VARIANTGATE_MAX_REQUEST_BODY_BYTES");
            std::env::remove_var("VARIANTGATE_STATELESS");
        }
    }

    #[test]
    fn test_session_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(session_from_headers(&headers).is_err());

        headers.insert(SESSION_ID_HEADER, "not-a-uuid".parse().unwrap());
        assert!(session_from_headers(&headers).is_err());

        let id = Uuid::new_v4();
        headers.insert(SESSION_ID_HEADER, id.to_string().parse().unwrap());
        assert_eq!(session_from_headers(&headers).unwrap(), id);
    }
}
