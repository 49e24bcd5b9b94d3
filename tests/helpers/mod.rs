//! Shared fixtures for the integration tests.
//!
//! Builds the two-variant proxy of the reference scenarios:
//!   - "coding": analyze_code, refactor (stable, priority 0)
//!   - "compact": summarize, lookup (experimental, priority 1)
//!
//! Note: some helpers are only used by a subset of the integration test
//! binaries and are marked with `#[allow(dead_code)]`.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use variantgate::protocol::{CallToolResult, Implementation, Tool};
use variantgate::server::VariantServer;
use variantgate::service::McpService;
use variantgate::variant::{ServerVariant, VariantStatus};

/// Experimental capability id (plural form, used on initialize).
pub const EXTENSION_ID: &str = "io.modelcontextprotocol/server-variants";

/// Per-request selector key (singular form).
pub const META_KEY: &str = "io.modelcontextprotocol/server-variant";

/// The "coding" variant's service: static analysis tools plus a
/// progress-emitting long task.
pub fn coding_service() -> Arc<McpService> {
    Arc::new(
        McpService::builder("coding-server", "1.0.0")
            .add_tool_fn(Tool::new("analyze_code", "Static analysis"), |_ctx, _args| {
                Ok(CallToolResult::structured(
                    json!({"issues": ["unused variable"]}),
                ))
            })
            .add_tool_fn(Tool::new("refactor", "Refactor code"), |_ctx, args| {
                let code = args
                    .as_ref()
                    .and_then(|a| a["code"].as_str())
                    .unwrap_or_default();
                Ok(CallToolResult::structured(
                    json!({"refactored": format!("// refactored\n{code}")}),
                ))
            })
            .add_tool_fn(Tool::new("long_task", "Slow analysis"), |ctx, _args| {
                ctx.notify_progress(0.5, Some(1.0), Some("halfway"));
                Ok(CallToolResult::text("done"))
            })
            .build(),
    )
}

/// The "compact" variant's service: minimal token usage tools.
pub fn compact_service() -> Arc<McpService> {
    Arc::new(
        McpService::builder("compact-server", "1.0.0")
            .add_tool_fn(Tool::new("summarize", "Summarize text"), |_ctx, args| {
                let text = args
                    .as_ref()
                    .and_then(|a| a["text"].as_str())
                    .unwrap_or_default();
                let summary: String = text.chars().take(50).collect();
                Ok(CallToolResult::structured(json!({"summary": summary})))
            })
            .add_tool_fn(Tool::new("lookup", "Quick lookup"), |_ctx, args| {
                let query = args
                    .as_ref()
                    .and_then(|a| a["query"].as_str())
                    .unwrap_or_default();
                Ok(CallToolResult::structured(
                    json!({"result": format!("result for: {query}")}),
                ))
            })
            .build(),
    )
}

/// Initialize test logging once; `RUST_LOG` controls verbosity.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A proxy with the two reference variants registered.
pub fn two_variant_server() -> VariantServer {
    init_logging();
    VariantServer::new(Implementation::new("test-server", "1.0.0"))
        .with_variant(
            ServerVariant::new("coding", "Optimized for coding workflows")
                .with_status(VariantStatus::Stable),
            coding_service(),
            0,
        )
        .with_variant(
            ServerVariant::new("compact", "Minimal token usage")
                .with_status(VariantStatus::Experimental),
            compact_service(),
            1,
        )
}

/// A JSON-RPC initialize request with empty hints.
pub fn initialize_request(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "0.0.1"}
        }
    })
}

/// A JSON-RPC request selecting a variant via `_meta`.
pub fn request_for_variant(id: i64, method: &str, variant: &str, mut params: Value) -> Value {
    params["_meta"] = json!({ META_KEY: variant });
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Tool names from a `tools/list` result value.
pub fn tool_names(result: &Value) -> Vec<String> {
    result["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| t["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
