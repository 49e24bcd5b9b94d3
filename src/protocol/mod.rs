//! MCP protocol layer: JSON-RPC framing, data types, capabilities.

pub mod capability;
pub mod jsonrpc;
pub mod types;

pub use capability::{
    CompletionCapabilities, LoggingCapabilities, PromptCapabilities, ResourceCapabilities,
    ServerCapabilities, ToolCapabilities, union_capabilities,
};
pub use jsonrpc::{
    JSONRPC_VERSION, JsonRpcId, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, McpRequest,
    ParsedRequests, parse_jsonrpc,
};
pub use types::{
    CallToolParams, CallToolResult, ClientCapabilities, CompleteArgument, CompleteParams,
    CompleteResult, Completion, Content, GetPromptParams, GetPromptResult, Implementation,
    InitializeParams, InitializeResult, LATEST_PROTOCOL_VERSION, ListParams, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, LoggingMessageParams,
    Meta, ProgressNotificationParams, Prompt, PromptArgument, PromptMessage,
    ReadResourceParams, ReadResourceResult, Resource, ResourceContents, ResourceTemplate,
    SUPPORTED_PROTOCOL_VERSIONS, SubscribeParams, Tool,
};
