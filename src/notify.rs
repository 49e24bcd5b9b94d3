//! Notification bridge between inner sessions and the front client.
//!
//! Progress and logging notifications emitted by an inner server are copied
//! onto the front session with the originating variant's id injected under
//! the per-request meta key, so clients can attribute asynchronous events to
//! the variant that produced them.
//!
//! The front session may already be gone when an inner notification arrives;
//! emitting then is a silent drop, never a failure.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::NotificationHandlers;
use crate::protocol::{
    JsonRpcRequest, LoggingMessageParams, Meta, ProgressNotificationParams,
};
use crate::variant::VARIANT_META_KEY;

/// Outbound notification handle for one front session.
///
/// Wraps the front transport's notification channel: the stdio transport
/// drains it into stdout, the HTTP transport into the session's SSE stream.
#[derive(Debug, Clone)]
pub struct FrontSession {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<JsonRpcRequest>,
}

impl FrontSession {
    pub(crate) fn new(session_id: Uuid, tx: mpsc::UnboundedSender<JsonRpcRequest>) -> Self {
        Self { session_id, tx }
    }

    /// The front session's identity.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Emit a `notifications/progress` to the front client.
    pub fn notify_progress(&self, params: ProgressNotificationParams) {
        self.send("notifications/progress", serde_json::to_value(params).ok());
    }

    /// Emit a `notifications/message` logging notification to the front
    /// client.
    pub fn log(&self, params: LoggingMessageParams) {
        self.send("notifications/message", serde_json::to_value(params).ok());
    }

    fn send(&self, method: &str, params: Option<Value>) {
        // A closed front session drops notifications.
        let _ = self.tx.send(JsonRpcRequest::notification(method, params));
    }
}

/// Insert the variant id into a params `_meta` map, preserving any existing
/// entries.
pub fn inject_variant_meta(meta: &mut Option<Meta>, variant_id: &str) {
    meta.get_or_insert_with(Meta::new)
        .insert(VARIANT_META_KEY.to_string(), Value::String(variant_id.to_string()));
}

/// Build the notification handlers an in-memory backend installs on its
/// inner session: progress and logging forward to the front session with
/// variant provenance; list-changed and resource-updated notifications are
/// absorbed (there is currently no generic re-emit path on the front
/// session). With no front session (stateless mode) everything is dropped.
pub fn forwarding_handlers(
    front: Option<FrontSession>,
    variant_id: &str,
) -> NotificationHandlers {
    let Some(front) = front else {
        return NotificationHandlers::default();
    };

    let progress_front = front.clone();
    let progress_variant = variant_id.to_string();
    let logging_front = front;
    let logging_variant = variant_id.to_string();

    NotificationHandlers {
        progress: Some(Arc::new(move |mut params: ProgressNotificationParams| {
            inject_variant_meta(&mut params.meta, &progress_variant);
            progress_front.notify_progress(params);
        })),
        logging: Some(Arc::new(move |mut params: LoggingMessageParams| {
            inject_variant_meta(&mut params.meta, &logging_variant);
            logging_front.log(params);
        })),
        other: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inject_creates_meta_when_absent() {
        let mut meta = None;
        inject_variant_meta(&mut meta, "coding");
        assert_eq!(
            meta.unwrap().get(VARIANT_META_KEY),
            Some(&json!("coding"))
        );
    }

    #[test]
    fn test_inject_preserves_existing_entries() {
        let mut existing = Meta::new();
        existing.insert("traceId".into(), json!("abc"));
        let mut meta = Some(existing);

        inject_variant_meta(&mut meta, "compact");

        let meta = meta.unwrap();
        assert_eq!(meta.get("traceId"), Some(&json!("abc")));
        assert_eq!(meta.get(VARIANT_META_KEY), Some(&json!("compact")));
    }

    #[test]
    fn test_inject_overwrites_prior_variant_id() {
        let mut meta = None;
        inject_variant_meta(&mut meta, "first");
        inject_variant_meta(&mut meta, "second");
        assert_eq!(meta.unwrap().get(VARIANT_META_KEY), Some(&json!("second")));
    }

    #[tokio::test]
    async fn test_forwarding_injects_variant_provenance() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let front = FrontSession::new(Uuid::new_v4(), tx);
        let handlers = forwarding_handlers(Some(front), "coding");

        let progress = handlers.progress.expect("progress handler installed");
        progress(ProgressNotificationParams {
            progress_token: json!("tok"),
            progress: 0.25,
            total: None,
            message: None,
            meta: None,
        });

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.method, "notifications/progress");
        let params = forwarded.params.unwrap();
        assert_eq!(params["_meta"][VARIANT_META_KEY], "coding");
        assert_eq!(params["progress"], 0.25);
    }

    #[tokio::test]
    async fn test_stateless_mode_drops_notifications() {
        let handlers = forwarding_handlers(None, "coding");
        assert!(handlers.progress.is_none());
        assert!(handlers.logging.is_none());
        assert!(handlers.other.is_none());
    }

    #[test]
    fn test_send_on_closed_front_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let front = FrontSession::new(Uuid::new_v4(), tx);
        drop(rx);

        // Must not panic or error.
        front.log(LoggingMessageParams {
            level: "info".into(),
            logger: None,
            data: json!("late message"),
            meta: None,
        });
    }
}
