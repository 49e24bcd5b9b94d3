//! Front server assembly.
//!
//! [`VariantServer`] collects variant registrations during a one-shot
//! construction phase, then assembles into a [`ProxyCore`]: the front MCP
//! server that advertises the union of every variant's capabilities, answers
//! `initialize` with the ranked variant list, and hands every routed request
//! to the owning session's dispatcher.
//!
//! Request flow (stateful mode):
//!
//! ```text
//! Client ── transport ──▸ ProxyCore
//!                            │
//!               ┌────────────┼────────────┐
//!               │            │            │
//!         initialize    route by     front default
//!         (create        _meta       (ping, unknown)
//!          per-session   variant
//!          connections)     │
//!                           ▼
//!                      Dispatcher
//!                           │
//!               ┌───────────┴───────────┐
//!               ▼                       ▼
//!        InnerConnection         InnerConnection
//!        (variant "A")           (variant "B")
//!               │                       │
//!           Backend                 Backend
//! ```
//!
//! In stateless mode the inner connections are created once at assembly and
//! shared across all requests instead of per-session.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, InMemoryBackend};
use crate::error::{JsonRpcError, VariantGateError};
use crate::notify::FrontSession;
use crate::protocol::{
    Implementation, JsonRpcResponse, LATEST_PROTOCOL_VERSION, McpRequest, Meta,
    SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, union_capabilities,
};
use crate::service::McpService;
use crate::session::SessionState;
use crate::variant::ranking::RankingFn;
use crate::variant::registry::VariantRegistry;
use crate::variant::{EXTENSION_CAPABILITY_ID, ServerVariant, VariantHints};

/// A variant-aware MCP server under construction.
///
/// Registration happens through the chainable `with_*` methods; assembly
/// into a running front server happens through the transport layer
/// ([`crate::transport::stdio::serve_io`] or
/// [`crate::transport::http::StreamableHttpServer`]).
///
/// Variant ids must be unique; registering a duplicate panics.
pub struct VariantServer {
    info: Implementation,
    registry: VariantRegistry,
}

impl VariantServer {
    /// Create a server with no registered variants.
    pub fn new(info: Implementation) -> Self {
        Self {
            info,
            registry: VariantRegistry::new(),
        }
    }

    /// Register a variant backed by an in-process [`McpService`].
    ///
    /// `priority` determines the default ordering when no ranking function
    /// is set; lower values indicate higher importance (0 = highest). By
    /// default the variant with the lowest priority value appears first in
    /// the ranked list and serves as the recommended default for clients.
    pub fn with_variant(
        self,
        variant: ServerVariant,
        service: Arc<McpService>,
        priority: i32,
    ) -> Self {
        self.with_backend(variant, Arc::new(InMemoryBackend::new(service)), priority)
    }

    /// Register a variant with an explicit backend implementation.
    pub fn with_backend(
        mut self,
        variant: ServerVariant,
        backend: Arc<dyn Backend>,
        priority: i32,
    ) -> Self {
        self.registry.register(variant, backend, priority);
        self
    }

    /// Register a variant backed by an MCP server exposed over HTTP.
    /// Not yet implemented.
    pub fn with_http_variant(self, _variant: ServerVariant, _endpoint: &str, _priority: i32) -> Self {
        panic!("variantgate: HTTP variant backends are not yet implemented");
    }

    /// Register a variant backed by a remote MCP server at the given
    /// endpoint URL. Not yet implemented.
    pub fn with_remote_variant(
        self,
        _variant: ServerVariant,
        _endpoint: &str,
        _priority: i32,
    ) -> Self {
        panic!("variantgate: remote variant backends are not yet implemented");
    }

    /// Set a custom ranking function used to order variants based on client
    /// hints during initialization. The function should return variants
    /// sorted by relevance, most appropriate first. Without one, variants
    /// are ordered by their priority value (lowest first).
    pub fn with_ranking(mut self, ranking: RankingFn) -> Self {
        self.registry.set_ranking(Some(ranking));
        self
    }

    /// Copies of all registered variants in registration order.
    pub fn variants(&self) -> Vec<ServerVariant> {
        self.registry.variants()
    }

    /// The registered variants ranked for the given hints (custom ranking
    /// function if set, priority-based otherwise, stable-first applied on
    /// top).
    pub fn ranked_variants(&self, hints: &VariantHints) -> Vec<ServerVariant> {
        self.registry.ranked(hints)
    }

    /// Serve a single session over stdin/stdout. The session (and its inner
    /// connections) is torn down when stdin reaches EOF.
    pub async fn serve_stdio(self) -> Result<(), VariantGateError> {
        crate::transport::stdio::serve_stdio(self).await
    }

    /// Probe every backend, union the capabilities, and build the front
    /// proxy core.
    pub(crate) async fn assemble(self, stateless: bool) -> Result<ProxyCore, VariantGateError> {
        ProxyCore::assemble(self.info, self.registry, stateless).await
    }
}

/// Identity and notification path of one front session, as seen by a
/// transport.
#[derive(Debug, Clone)]
pub struct FrontContext {
    pub(crate) session_id: Uuid,
    pub(crate) notify: Option<FrontSession>,
}

impl FrontContext {
    pub(crate) fn new(session_id: Uuid, notify: Option<FrontSession>) -> Self {
        Self { session_id, notify }
    }

    /// The session id this context routes under.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

/// The assembled front server: unioned capabilities, the session table and
/// (in stateless mode) the shared session state.
#[derive(Debug)]
pub struct ProxyCore {
    info: Implementation,
    registry: VariantRegistry,
    capabilities: ServerCapabilities,
    sessions: DashMap<Uuid, Arc<SessionState>>,
    shared: Option<Arc<SessionState>>,
}

impl ProxyCore {
    pub(crate) async fn assemble(
        info: Implementation,
        registry: VariantRegistry,
        stateless: bool,
    ) -> Result<Self, VariantGateError> {
        if registry.is_empty() {
            return Err(VariantGateError::ConfigurationError {
                details: "no variants registered".to_string(),
            });
        }

        // Probe each backend once to learn what the front server advertises.
        let mut all_caps = Vec::with_capacity(registry.len());
        for entry in registry.entries() {
            all_caps.push(entry.backend.capabilities().await?);
        }
        let capabilities = union_capabilities(&all_caps);

        // In stateless mode the shared connections are created exactly once,
        // here, and reclaimed by close().
        let shared = if stateless {
            let ranking = registry.ranked_ids(&VariantHints::default());
            Some(Arc::new(
                SessionState::connect_all(&registry, ranking, None).await?,
            ))
        } else {
            None
        };

        info!(
            variants = registry.len(),
            stateless, "variant proxy assembled"
        );

        Ok(Self {
            info,
            registry,
            capabilities,
            sessions: DashMap::new(),
            shared,
        })
    }

    /// The unioned capability set the front server advertises.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// True when running with shared (stateless) inner connections.
    pub fn is_stateless(&self) -> bool {
        self.shared.is_some()
    }

    /// Number of live per-session states.
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handle one front request. Returns `None` for notifications (which
    /// get no response).
    pub async fn handle(
        &self,
        context: &FrontContext,
        request: McpRequest,
    ) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "notification absorbed");
            return None;
        }

        debug!(
            correlation_id = %request.correlation_id,
            method = %request.method,
            session = %context.session_id,
            "handling request"
        );

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(context, &request).await,
            // The front server always answers pings itself, never an inner
            // session.
            "ping" => JsonRpcResponse::success(request.id.clone(), json!({})),
            // Log level selection applies to the front session as a whole.
            "logging/setLevel" => JsonRpcResponse::success(request.id.clone(), json!({})),
            method => match self.lookup_state(context) {
                Some(state) => match state.dispatcher.dispatch(method, request.params.as_ref()).await
                {
                    Some(Ok(result)) => JsonRpcResponse::success(request.id.clone(), result),
                    Some(Err(error)) => JsonRpcResponse::error(request.id.clone(), error),
                    None => JsonRpcResponse::error(
                        request.id.clone(),
                        JsonRpcError::method_not_found(method),
                    ),
                },
                None => JsonRpcResponse::error(
                    request.id.clone(),
                    VariantGateError::InvalidRequest {
                        details: "received request before initialize".to_string(),
                    }
                    .into(),
                ),
            },
        };

        Some(response)
    }

    /// Destroy the per-session state registered under `session_id`, closing
    /// every inner connection it owns.
    pub fn close_session(&self, session_id: Uuid) {
        if let Some((_, state)) = self.sessions.remove(&session_id) {
            state.close();
            debug!(session = %session_id, "front session closed");
        }
    }

    /// Release everything: per-session states, the shared stateless state,
    /// and backend-level resources.
    pub async fn close(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.close_session(id);
        }
        if let Some(shared) = &self.shared {
            shared.close();
        }
        for entry in self.registry.entries() {
            if let Err(e) = entry.backend.close().await {
                warn!(variant = %entry.variant.id, error = %e, "backend close failed");
            }
        }
    }

    fn lookup_state(&self, context: &FrontContext) -> Option<Arc<SessionState>> {
        if let Some(state) = self.sessions.get(&context.session_id) {
            return Some(Arc::clone(state.value()));
        }
        self.shared.clone()
    }

    async fn handle_initialize(
        &self,
        context: &FrontContext,
        request: &McpRequest,
    ) -> JsonRpcResponse {
        let params = request.params.as_ref();
        let hints = extract_variant_hints(params);
        let ranked = self.registry.ranked(&hints);

        // Stateful mode: one inner connection per variant, scoped to this
        // front session. The ranking computed here (with the client's
        // hints) is cached as the session default.
        if self.shared.is_none() {
            let ranking = ranked.iter().map(|v| v.id.clone()).collect();
            let state = match SessionState::connect_all(
                &self.registry,
                ranking,
                context.notify.clone(),
            )
            .await
            {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "initialize failed");
                    return JsonRpcResponse::error(request.id.clone(), e.into());
                }
            };

            // A re-initialize on the same session replaces its state.
            if let Some((_, previous)) = self.sessions.remove(&context.session_id) {
                previous.close();
            }
            self.sessions
                .insert(context.session_id, Arc::new(state));
        }

        let requested_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested_version) {
            requested_version
        } else {
            LATEST_PROTOCOL_VERSION
        };

        let more_available = ranked.len() < self.registry.len();
        let mut capabilities = self.capabilities.clone();
        capabilities
            .experimental
            .get_or_insert_with(Meta::new)
            .insert(
                EXTENSION_CAPABILITY_ID.to_string(),
                json!({
                    "availableVariants": ranked,
                    "moreVariantsAvailable": more_available,
                }),
            );

        JsonRpcResponse::success(
            request.id.clone(),
            json!({
                "protocolVersion": version,
                "capabilities": capabilities,
                "serverInfo": self.info,
            }),
        )
    }
}

/// Extract client-provided variant hints from the initialize request's
/// extension payload:
/// `params.capabilities.experimental["io.modelcontextprotocol/server-variants"].variantHints`.
///
/// Anything missing or malformed yields empty hints.
fn extract_variant_hints(params: Option<&Value>) -> VariantHints {
    let Some(hints) = params
        .and_then(|p| p.get("capabilities"))
        .and_then(|c| c.get("experimental"))
        .and_then(|e| e.get(EXTENSION_CAPABILITY_ID))
        .and_then(|ext| ext.get("variantHints"))
    else {
        return VariantHints::default();
    };
    serde_json::from_value(hints.clone()).unwrap_or_default()
}
