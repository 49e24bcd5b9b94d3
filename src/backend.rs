//! Backend abstraction: how a variant connects to its backing MCP server.
//!
//! The core depends only on the [`Backend`] capability set (probe, connect,
//! close). The in-memory implementation lives here; HTTP and remote backends
//! are reserved extension points surfaced as panicking registration methods
//! on the front server builder.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::client::{InnerSession, NotificationHandlers};
use crate::error::VariantGateError;
use crate::notify::{FrontSession, forwarding_handlers};
use crate::protocol::{Implementation, ServerCapabilities};
use crate::service::McpService;
use crate::transport::memory::memory_pair;
use crate::variant::ServerVariant;

/// Client identity the proxy presents to inner servers.
const PROXY_CLIENT_NAME: &str = "variantgate-proxy";

/// Client identity used for ephemeral capability probes.
const PROBE_CLIENT_NAME: &str = "variantgate-probe";

/// How a variant connects to its backing MCP server.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Perform an ephemeral connect to discover the server's advertised
    /// capabilities, then tear the probe connection down. Invoked once per
    /// backend at proxy assembly time.
    async fn capabilities(&self) -> Result<ServerCapabilities, VariantGateError>;

    /// Open a durable inner session for dispatching requests.
    ///
    /// `front` is the notification target for this session; `None` in
    /// stateless mode, where inner notifications are dropped.
    async fn connect(
        &self,
        variant: &ServerVariant,
        front: Option<FrontSession>,
    ) -> Result<InnerConnection, VariantGateError>;

    /// Release backend-level resources.
    async fn close(&self) -> Result<(), VariantGateError>;
}

/// The resources for communicating with one inner server: the client-side
/// session plus a backend-specific teardown hook.
pub struct InnerConnection {
    /// The live session used for dispatching.
    pub session: InnerSession,
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl std::fmt::Debug for InnerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerConnection").finish_non_exhaustive()
    }
}

impl InnerConnection {
    /// Bundle a session with its teardown hook.
    pub fn new(session: InnerSession, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            session,
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// Close the session and run the teardown hook. Idempotent: the hook
    /// runs at most once.
    pub fn close(&self) {
        self.session.close();
        let hook = self.teardown.lock().expect("teardown lock poisoned").take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Connects to a co-located [`McpService`] via in-memory transports.
///
/// Limitation: list-changed and resource-updated notifications from inner
/// servers are absorbed. The front session currently exposes only progress
/// and logging emission, so there is no path to re-emit dynamic capability
/// changes. Inner servers are statically configured in practice, which keeps
/// this invisible; lifting it requires a generic notification sender on the
/// front session.
pub struct InMemoryBackend {
    service: Arc<McpService>,
}

impl InMemoryBackend {
    /// Wrap an in-process service as a backend.
    pub fn new(service: Arc<McpService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn capabilities(&self) -> Result<ServerCapabilities, VariantGateError> {
        let (proxy_side, server_side) = memory_pair();
        let handle = self.service.serve(server_side);

        let session = match InnerSession::connect(
            proxy_side,
            NotificationHandlers::default(),
            Implementation::new(PROBE_CLIENT_NAME, env!("CARGO_PKG_VERSION")),
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                handle.close();
                return Err(e);
            }
        };

        let capabilities = session.initialize_result().capabilities.clone();
        session.close();
        handle.close();
        Ok(capabilities)
    }

    async fn connect(
        &self,
        variant: &ServerVariant,
        front: Option<FrontSession>,
    ) -> Result<InnerConnection, VariantGateError> {
        let (proxy_side, server_side) = memory_pair();
        let handle = self.service.serve(server_side);
        let handlers = forwarding_handlers(front, &variant.id);

        match InnerSession::connect(
            proxy_side,
            handlers,
            Implementation::new(PROXY_CLIENT_NAME, env!("CARGO_PKG_VERSION")),
        )
        .await
        {
            Ok(session) => {
                debug!(variant = %variant.id, "inner connection opened");
                Ok(InnerConnection::new(session, move || handle.close()))
            }
            Err(e) => {
                handle.close();
                Err(VariantGateError::ConnectFailed {
                    variant: variant.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn close(&self) -> Result<(), VariantGateError> {
        // Per-session resources are torn down through InnerConnection hooks;
        // the service itself holds nothing to release.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::protocol::{CallToolResult, Tool};
    use serde_json::json;

    fn coding_service() -> Arc<McpService> {
        Arc::new(
            McpService::builder("coding-server", "1.0.0")
                .add_tool_fn(Tool::new("analyze_code", "Static analysis"), |_ctx, _args| {
                    Ok(CallToolResult::structured(json!({"issues": []})))
                })
                .enable_logging()
                .build(),
        )
    }

    #[tokio::test]
    async fn test_capability_probe_reads_advertisement() {
        let backend = InMemoryBackend::new(coding_service());
        let caps = backend.capabilities().await.unwrap();
        assert!(caps.tools.is_some());
        assert!(caps.logging.is_some());
        assert!(caps.prompts.is_none());
    }

    #[tokio::test]
    async fn test_connect_and_dispatch() {
        let backend = InMemoryBackend::new(coding_service());
        let variant = ServerVariant::new("coding", "Optimized for coding workflows");

        let connection = backend.connect(&variant, None).await.unwrap();
        let tools = connection.session.list_tools(None).await.unwrap();
        assert_eq!(tools.tools[0].name, "analyze_code");

        connection.close();
        assert!(connection.session.is_closed());
    }

    #[tokio::test]
    async fn test_teardown_runs_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let backend = InMemoryBackend::new(coding_service());
        let variant = ServerVariant::new("coding", "desc");

        let connection = backend.connect(&variant, None).await.unwrap();
        let session = connection.session.clone();
        let count = Arc::clone(&counter);
        let connection = InnerConnection::new(session, move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        connection.close();
        connection.close();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
