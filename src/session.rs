//! Per-front-session state.
//!
//! In stateful mode one [`SessionState`] is created per client during
//! `initialize` and destroyed when the front session closes. In stateless
//! mode a single shared instance is created at assembly and lives until the
//! server is closed. Either way construction is atomic: if any backend fails
//! to connect, the connections opened so far are closed before the error
//! returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::error::VariantGateError;
use crate::notify::FrontSession;
use crate::variant::registry::VariantRegistry;

/// All per-session state for one front client: the dispatcher owning one
/// inner connection per variant.
#[derive(Debug)]
pub struct SessionState {
    /// Routes this session's requests to its inner connections.
    pub dispatcher: Dispatcher,
    closed: AtomicBool,
}

impl SessionState {
    /// Open one inner connection per registered variant.
    ///
    /// `ranking` is the ranked id list computed during `initialize` with the
    /// client's hints; it becomes the session default for unselected
    /// requests. On any connect failure the connections opened so far are
    /// closed and the failure is returned.
    pub async fn connect_all(
        registry: &VariantRegistry,
        ranking: Vec<String>,
        front: Option<FrontSession>,
    ) -> Result<Self, VariantGateError> {
        let mut connections = HashMap::with_capacity(registry.len());

        for entry in registry.entries() {
            match entry.backend.connect(&entry.variant, front.clone()).await {
                Ok(connection) => {
                    connections.insert(entry.variant.id.clone(), connection);
                }
                Err(e) => {
                    warn!(
                        variant = %entry.variant.id,
                        error = %e,
                        "backend connect failed; rolling back session"
                    );
                    for (_, connection) in connections.drain() {
                        connection.close();
                    }
                    return Err(e);
                }
            }
        }

        debug!(variants = connections.len(), "session state created");
        Ok(Self {
            dispatcher: Dispatcher::new(connections, ranking),
            closed: AtomicBool::new(false),
        })
    }

    /// Tear down every inner connection owned by this session. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.dispatcher.close_connections();
            debug!("session state closed");
        }
    }

    /// True once `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{Backend, InMemoryBackend, InnerConnection};
    use crate::error::VariantGateError;
    use crate::protocol::ServerCapabilities;
    use crate::service::McpService;
    use crate::variant::ServerVariant;

    /// Backend that always fails to connect.
    struct FailingBackend;

    #[async_trait]
    impl Backend for FailingBackend {
        async fn capabilities(&self) -> Result<ServerCapabilities, VariantGateError> {
            Ok(ServerCapabilities::default())
        }

        async fn connect(
            &self,
            variant: &ServerVariant,
            _front: Option<FrontSession>,
        ) -> Result<InnerConnection, VariantGateError> {
            Err(VariantGateError::ConnectFailed {
                variant: variant.id.clone(),
                reason: "wired to fail".into(),
            })
        }

        async fn close(&self) -> Result<(), VariantGateError> {
            Ok(())
        }
    }

    fn working_backend() -> Arc<dyn Backend> {
        Arc::new(InMemoryBackend::new(Arc::new(
            McpService::builder("inner", "1.0.0").build(),
        )))
    }

    #[tokio::test]
    async fn test_connect_all_opens_every_variant() {
        let mut registry = VariantRegistry::new();
        registry.register(ServerVariant::new("a", "first"), working_backend(), 0);
        registry.register(ServerVariant::new("b", "second"), working_backend(), 1);

        let state = SessionState::connect_all(&registry, vec!["a".into(), "b".into()], None)
            .await
            .unwrap();
        assert_eq!(state.dispatcher.ranking(), ["a", "b"]);
        state.close();
    }

    #[tokio::test]
    async fn test_partial_failure_rolls_back() {
        let mut registry = VariantRegistry::new();
        registry.register(ServerVariant::new("good", "works"), working_backend(), 0);
        registry.register(
            ServerVariant::new("bad", "fails"),
            Arc::new(FailingBackend),
            1,
        );

        let err = SessionState::connect_all(&registry, vec!["good".into(), "bad".into()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, VariantGateError::ConnectFailed { ref variant, .. } if variant == "bad"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut registry = VariantRegistry::new();
        registry.register(ServerVariant::new("a", "first"), working_backend(), 0);

        let state = SessionState::connect_all(&registry, vec!["a".into()], None)
            .await
            .unwrap();
        state.close();
        assert!(state.is_closed());
        state.close();
    }
}
