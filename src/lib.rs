//! variantgate - variant-aware multiplexing proxy for the Model Context
//! Protocol.
//!
//! A single MCP server can advertise multiple *variants*: distinct
//! packagings of tools, resources and prompts targeted at different model
//! families, use cases or context-size budgets. variantgate terminates one
//! MCP session with the client and, underneath, holds one sub-session per
//! variant against the backing servers. It negotiates capabilities by union
//! over variants, ranks variants per client hints, dispatches every method
//! to the correct inner session based on a per-request `_meta` selector,
//! keeps cursors and subscriptions variant-scoped, and forwards progress and
//! logging notifications back to the client with variant provenance.
//!
//! # Extension surface
//!
//! On `initialize`, clients may send ranking hints under
//! `capabilities.experimental["io.modelcontextprotocol/server-variants"]`;
//! the response lists `availableVariants` in rank order under the same key.
//! Individual requests select a variant with
//! `params._meta["io.modelcontextprotocol/server-variant"]` (singular). A
//! variant-unaware client sees a normal MCP session backed by the
//! first-ranked variant.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use variantgate::protocol::{CallToolResult, Implementation, Tool};
//! use variantgate::service::McpService;
//! use variantgate::variant::{ServerVariant, VariantStatus};
//! use variantgate::server::VariantServer;
//!
//! # async fn run() -> Result<(), variantgate::error::VariantGateError> {
//! let coding = Arc::new(
//!     McpService::builder("my-server", "1.0.0")
//!         .add_tool_fn(Tool::new("analyze_code", "Static analysis"), |_ctx, _args| {
//!             Ok(CallToolResult::text("no issues"))
//!         })
//!         .build(),
//! );
//! let compact = Arc::new(
//!     McpService::builder("my-server", "1.0.0")
//!         .add_tool_fn(Tool::new("summarize", "Summarize text"), |_ctx, _args| {
//!             Ok(CallToolResult::text("tl;dr"))
//!         })
//!         .build(),
//! );
//!
//! VariantServer::new(Implementation::new("my-server", "1.0.0"))
//!     .with_variant(
//!         ServerVariant::new("coding", "Optimized for coding workflows")
//!             .with_status(VariantStatus::Stable),
//!         coding,
//!         0,
//!     )
//!     .with_variant(
//!         ServerVariant::new("compact", "Minimal token usage")
//!             .with_status(VariantStatus::Experimental),
//!         compact,
//!         1,
//!     )
//!     .serve_stdio()
//!     .await
//! # }
//! ```
//!
//! For multi-client HTTP support, see
//! [`transport::http::StreamableHttpServer`].

pub mod backend;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod server;
pub mod service;
pub mod session;
pub mod transport;
pub mod variant;

pub use backend::{Backend, InMemoryBackend, InnerConnection};
pub use client::{InnerSession, NotificationHandlers};
pub use error::{JsonRpcError, VariantGateError};
pub use protocol::{Implementation, ServerCapabilities};
pub use server::VariantServer;
pub use service::{McpService, ToolContext};
pub use variant::{
    DeprecationInfo, EXTENSION_CAPABILITY_ID, ServerVariant, VARIANT_META_KEY, VariantHints,
    VariantStatus,
};
