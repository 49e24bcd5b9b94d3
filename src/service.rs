//! In-process inner MCP server.
//!
//! [`McpService`] hosts one variant's tools, resources and prompts and
//! answers the MCP method set over an in-memory transport. Each `serve()`
//! call handles one session; the proxy opens one session per variant per
//! front client (stateful) or one shared session per variant (stateless).
//!
//! Tool handlers receive a [`ToolContext`] through which they can emit
//! progress and logging notifications back over the session's transport.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::JsonRpcError;
use crate::protocol::{
    CallToolParams, CallToolResult, CompleteParams, CompleteResult, Completion,
    GetPromptParams, GetPromptResult, Implementation, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse, LATEST_PROTOCOL_VERSION, ListParams, LoggingMessageParams,
    ProgressNotificationParams, Prompt, PromptMessage, ReadResourceParams, Resource,
    ResourceContents, ResourceTemplate, SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities,
    SubscribeParams, Tool,
};
use crate::protocol::capability::{
    CompletionCapabilities, LoggingCapabilities, PromptCapabilities, ResourceCapabilities,
    ToolCapabilities,
};
use crate::transport::memory::MemoryTransport;

/// Future type returned by tool handlers.
pub type ToolFuture =
    Pin<Box<dyn Future<Output = Result<CallToolResult, JsonRpcError>> + Send + 'static>>;

/// A tool implementation: receives the call context and the raw arguments.
pub type ToolHandler = Arc<dyn Fn(ToolContext, Option<Value>) -> ToolFuture + Send + Sync>;

/// A completion implementation.
pub type CompletionHandler =
    Arc<dyn Fn(&CompleteParams) -> Result<CompleteResult, JsonRpcError> + Send + Sync>;

struct RegisteredTool {
    tool: Tool,
    handler: ToolHandler,
}

struct RegisteredResource {
    resource: Resource,
    contents: ResourceContents,
}

struct RegisteredPrompt {
    prompt: Prompt,
    messages: Vec<PromptMessage>,
}

/// Context handed to tool handlers for the duration of one call.
///
/// Notifications are written straight to the session transport; if the
/// session is gone they are dropped.
#[derive(Clone)]
pub struct ToolContext {
    outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    progress_token: Option<Value>,
}

impl ToolContext {
    /// Emit a `notifications/progress` tied to the in-flight call. No-op
    /// when the caller did not send a progress token.
    pub fn notify_progress(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        let Some(token) = &self.progress_token else {
            return;
        };
        let params = ProgressNotificationParams {
            progress_token: token.clone(),
            progress,
            total,
            message: message.map(str::to_string),
            meta: None,
        };
        self.notify("notifications/progress", serde_json::to_value(params).ok());
    }

    /// Emit a `notifications/message` logging notification.
    pub fn log(&self, level: &str, data: Value) {
        let params = LoggingMessageParams {
            level: level.to_string(),
            logger: None,
            data,
            meta: None,
        };
        self.notify("notifications/message", serde_json::to_value(params).ok());
    }

    fn notify(&self, method: &str, params: Option<Value>) {
        let _ = self
            .outbound
            .send(JsonRpcMessage::Request(JsonRpcRequest::notification(
                method, params,
            )));
    }
}

/// Builder for [`McpService`].
pub struct McpServiceBuilder {
    info: Implementation,
    instructions: Option<String>,
    tools: Vec<RegisteredTool>,
    resources: Vec<RegisteredResource>,
    resource_templates: Vec<ResourceTemplate>,
    prompts: Vec<RegisteredPrompt>,
    completion: Option<CompletionHandler>,
    page_size: Option<usize>,
    subscribe: bool,
    logging: bool,
    tools_list_changed: bool,
}

impl McpServiceBuilder {
    /// Register a tool with its handler.
    pub fn add_tool(
        mut self,
        tool: Tool,
        handler: impl Fn(ToolContext, Option<Value>) -> ToolFuture + Send + Sync + 'static,
    ) -> Self {
        self.tools.push(RegisteredTool {
            tool,
            handler: Arc::new(handler),
        });
        self
    }

    /// Register a tool whose handler is a plain synchronous function.
    pub fn add_tool_fn(
        self,
        tool: Tool,
        handler: impl Fn(ToolContext, Option<Value>) -> Result<CallToolResult, JsonRpcError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.add_tool(tool, move |ctx, args| {
            let result = handler(ctx, args);
            Box::pin(async move { result })
        })
    }

    /// Register a resource with static text contents.
    pub fn add_resource(mut self, resource: Resource, text: impl Into<String>) -> Self {
        let contents = ResourceContents {
            uri: resource.uri.clone(),
            mime_type: resource.mime_type.clone(),
            text: Some(text.into()),
        };
        self.resources.push(RegisteredResource { resource, contents });
        self
    }

    /// Register a resource template.
    pub fn add_resource_template(mut self, template: ResourceTemplate) -> Self {
        self.resource_templates.push(template);
        self
    }

    /// Register a prompt with static messages.
    pub fn add_prompt(mut self, prompt: Prompt, messages: Vec<PromptMessage>) -> Self {
        self.prompts.push(RegisteredPrompt { prompt, messages });
        self
    }

    /// Install a `completion/complete` handler; advertises the completions
    /// capability.
    pub fn completion(mut self, handler: CompletionHandler) -> Self {
        self.completion = Some(handler);
        self
    }

    /// Paginate list responses at `page_size` items, emitting offset
    /// cursors. Unset means single-page responses.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Advertise and accept `resources/subscribe`.
    pub fn enable_subscriptions(mut self) -> Self {
        self.subscribe = true;
        self
    }

    /// Advertise the logging capability.
    pub fn enable_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    /// Advertise `tools.listChanged`.
    pub fn tools_list_changed(mut self) -> Self {
        self.tools_list_changed = true;
        self
    }

    /// Set the instructions string returned from initialize.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Finish the builder.
    pub fn build(self) -> McpService {
        McpService {
            info: self.info,
            instructions: self.instructions,
            tools: self.tools,
            resources: self.resources,
            resource_templates: self.resource_templates,
            prompts: self.prompts,
            completion: self.completion,
            page_size: self.page_size,
            subscribe: self.subscribe,
            logging: self.logging,
            tools_list_changed: self.tools_list_changed,
        }
    }
}

/// An in-process MCP server hosting one variant's capability surface.
pub struct McpService {
    info: Implementation,
    instructions: Option<String>,
    tools: Vec<RegisteredTool>,
    resources: Vec<RegisteredResource>,
    resource_templates: Vec<ResourceTemplate>,
    prompts: Vec<RegisteredPrompt>,
    completion: Option<CompletionHandler>,
    page_size: Option<usize>,
    subscribe: bool,
    logging: bool,
    tools_list_changed: bool,
}

/// Handle to one running service session. Closing aborts the session task
/// and drops its transport end.
#[derive(Debug)]
pub struct ServiceHandle {
    task: JoinHandle<()>,
}

impl ServiceHandle {
    /// Tear the session down. Idempotent.
    pub fn close(&self) {
        self.task.abort();
    }

    /// True once the session task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl McpService {
    /// Start building a service.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpServiceBuilder {
        McpServiceBuilder {
            info: Implementation::new(name, version),
            instructions: None,
            tools: Vec::new(),
            resources: Vec::new(),
            resource_templates: Vec::new(),
            prompts: Vec::new(),
            completion: None,
            page_size: None,
            subscribe: false,
            logging: false,
            tools_list_changed: false,
        }
    }

    /// The capability set this service advertises, derived from what is
    /// registered.
    pub fn capabilities(&self) -> ServerCapabilities {
        let mut caps = ServerCapabilities::default();
        if !self.tools.is_empty() {
            caps.tools = Some(ToolCapabilities {
                list_changed: self.tools_list_changed,
            });
        }
        if !self.resources.is_empty() || !self.resource_templates.is_empty() || self.subscribe {
            caps.resources = Some(ResourceCapabilities {
                subscribe: self.subscribe,
                list_changed: false,
            });
        }
        if !self.prompts.is_empty() {
            caps.prompts = Some(PromptCapabilities {
                list_changed: false,
            });
        }
        if self.completion.is_some() {
            caps.completions = Some(CompletionCapabilities {});
        }
        if self.logging {
            caps.logging = Some(LoggingCapabilities {});
        }
        caps
    }

    /// Serve one session over the given transport. Returns a handle whose
    /// `close()` tears the session down.
    pub fn serve(self: &Arc<Self>, transport: MemoryTransport) -> ServiceHandle {
        let service = Arc::clone(self);
        let task = tokio::spawn(async move { service.run(transport).await });
        ServiceHandle { task }
    }

    async fn run(self: Arc<Self>, transport: MemoryTransport) {
        let (outbound, mut inbound) = transport.into_split();
        // Per-session subscription set; dropped with the session.
        let mut subscriptions: HashSet<String> = HashSet::new();

        while let Some(message) = inbound.recv().await {
            let request = match message {
                JsonRpcMessage::Request(request) => request,
                // Inner servers make no outgoing requests, so no responses
                // are expected here.
                JsonRpcMessage::Response(_) => continue,
            };

            if request.is_notification() {
                debug!(server = %self.info.name, method = %request.method, "notification received");
                continue;
            }

            let id = request.id.clone();
            let context = ToolContext {
                outbound: outbound.clone(),
                progress_token: progress_token(request.params.as_ref()),
            };

            let response = match self
                .handle_method(&request.method, request.params, context, &mut subscriptions)
                .await
            {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => JsonRpcResponse::error(id, error),
            };

            if outbound.send(JsonRpcMessage::Response(response)).is_err() {
                // Peer went away; nothing left to serve.
                return;
            }
        }
    }

    async fn handle_method(
        &self,
        method: &str,
        params: Option<Value>,
        context: ToolContext,
        subscriptions: &mut HashSet<String>,
    ) -> Result<Value, JsonRpcError> {
        match method {
            "initialize" => self.handle_initialize(params),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(params),
            "tools/call" => self.handle_tools_call(params, context).await,
            "resources/list" => self.handle_resources_list(params),
            "resources/templates/list" => self.handle_templates_list(params),
            "resources/read" => self.handle_resources_read(params),
            "resources/subscribe" => self.handle_subscribe(params, subscriptions),
            "resources/unsubscribe" => self.handle_unsubscribe(params, subscriptions),
            "prompts/list" => self.handle_prompts_list(params),
            "prompts/get" => self.handle_prompts_get(params),
            "completion/complete" => self.handle_complete(params),
            "logging/setLevel" => Ok(json!({})),
            other => {
                warn!(server = %self.info.name, method = %other, "unknown method");
                Err(JsonRpcError::method_not_found(other))
            }
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let requested = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            requested
        } else {
            LATEST_PROTOCOL_VERSION
        };

        let mut result = json!({
            "protocolVersion": version,
            "capabilities": self.capabilities(),
            "serverInfo": self.info,
        });
        if let Some(instructions) = &self.instructions {
            result["instructions"] = json!(instructions);
        }
        Ok(result)
    }

    fn handle_tools_list(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let cursor = list_cursor(params)?;
        let tools: Vec<&Tool> = self.tools.iter().map(|t| &t.tool).collect();
        let (page, next_cursor) = self.paginate(&tools, cursor.as_deref())?;
        Ok(list_result("tools", page, next_cursor))
    }

    async fn handle_tools_call(
        &self,
        params: Option<Value>,
        context: ToolContext,
    ) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(params, "tools/call")?;
        let registered = self
            .tools
            .iter()
            .find(|t| t.tool.name == params.name)
            .ok_or_else(|| {
                JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name))
            })?;

        debug!(server = %self.info.name, tool = %params.name, "tool call");
        let result = (registered.handler)(context, params.arguments).await?;
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }

    fn handle_resources_list(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let cursor = list_cursor(params)?;
        let resources: Vec<&Resource> = self.resources.iter().map(|r| &r.resource).collect();
        let (page, next_cursor) = self.paginate(&resources, cursor.as_deref())?;
        Ok(list_result("resources", page, next_cursor))
    }

    fn handle_templates_list(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let cursor = list_cursor(params)?;
        let templates: Vec<&ResourceTemplate> = self.resource_templates.iter().collect();
        let (page, next_cursor) = self.paginate(&templates, cursor.as_deref())?;
        Ok(list_result("resourceTemplates", page, next_cursor))
    }

    fn handle_resources_read(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ReadResourceParams = parse_params(params, "resources/read")?;
        let registered = self
            .resources
            .iter()
            .find(|r| r.resource.uri == params.uri)
            .ok_or_else(|| {
                JsonRpcError::invalid_params(format!("Unknown resource: {}", params.uri))
            })?;
        Ok(json!({ "contents": [registered.contents] }))
    }

    fn handle_subscribe(
        &self,
        params: Option<Value>,
        subscriptions: &mut HashSet<String>,
    ) -> Result<Value, JsonRpcError> {
        if !self.subscribe {
            return Err(JsonRpcError::method_not_found("resources/subscribe"));
        }
        let params: SubscribeParams = parse_params(params, "resources/subscribe")?;
        if !self.resources.iter().any(|r| r.resource.uri == params.uri) {
            return Err(JsonRpcError::invalid_params(format!(
                "Unknown resource: {}",
                params.uri
            )));
        }
        subscriptions.insert(params.uri);
        Ok(json!({}))
    }

    /// Unsubscribe accepts URIs whose resource has since disappeared:
    /// the subscription record is removed if present, and the call
    /// succeeds either way.
    fn handle_unsubscribe(
        &self,
        params: Option<Value>,
        subscriptions: &mut HashSet<String>,
    ) -> Result<Value, JsonRpcError> {
        if !self.subscribe {
            return Err(JsonRpcError::method_not_found("resources/unsubscribe"));
        }
        let params: SubscribeParams = parse_params(params, "resources/unsubscribe")?;
        subscriptions.remove(&params.uri);
        Ok(json!({}))
    }

    fn handle_prompts_list(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let cursor = list_cursor(params)?;
        let prompts: Vec<&Prompt> = self.prompts.iter().map(|p| &p.prompt).collect();
        let (page, next_cursor) = self.paginate(&prompts, cursor.as_deref())?;
        Ok(list_result("prompts", page, next_cursor))
    }

    fn handle_prompts_get(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: GetPromptParams = parse_params(params, "prompts/get")?;
        let registered = self
            .prompts
            .iter()
            .find(|p| p.prompt.name == params.name)
            .ok_or_else(|| {
                JsonRpcError::invalid_params(format!("Unknown prompt: {}", params.name))
            })?;
        let result = GetPromptResult {
            description: registered.prompt.description.clone(),
            messages: registered.messages.clone(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }

    fn handle_complete(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CompleteParams = parse_params(params, "completion/complete")?;
        let result = match &self.completion {
            Some(handler) => handler(&params)?,
            None => CompleteResult {
                completion: Completion {
                    values: Vec::new(),
                    total: None,
                    has_more: None,
                },
            },
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }

    /// Offset-based pagination. Inner cursors are plain decimal offsets;
    /// the proxy wraps them before they reach clients.
    fn paginate<T: serde::Serialize>(
        &self,
        items: &[T],
        cursor: Option<&str>,
    ) -> Result<(Vec<Value>, Option<String>), JsonRpcError> {
        let offset = match cursor {
            None | Some("") => 0,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| JsonRpcError::invalid_params(format!("Invalid cursor: {raw}")))?,
        };
        if offset > items.len() {
            return Err(JsonRpcError::invalid_params(format!(
                "Cursor out of range: {offset}"
            )));
        }

        let end = match self.page_size {
            Some(size) => (offset + size).min(items.len()),
            None => items.len(),
        };
        let page = items[offset..end]
            .iter()
            .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
            .collect();
        let next_cursor = (end < items.len()).then(|| end.to_string());
        Ok((page, next_cursor))
    }
}

/// Extract the progress token from a request's `_meta`, if any.
fn progress_token(params: Option<&Value>) -> Option<Value> {
    params?.get("_meta")?.get("progressToken").cloned()
}

/// Deserialize params, reporting the owning method on failure.
fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
    method: &str,
) -> Result<T, JsonRpcError> {
    let params = params
        .ok_or_else(|| JsonRpcError::invalid_params(format!("missing {method} params")))?;
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid {method} params: {e}")))
}

/// Extract the cursor from raw list params.
fn list_cursor(params: Option<Value>) -> Result<Option<String>, JsonRpcError> {
    let Some(params) = params else {
        return Ok(None);
    };
    let params: ListParams = serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid list params: {e}")))?;
    Ok(params.cursor)
}

/// Assemble a list result under the given key.
fn list_result(key: &str, page: Vec<Value>, next_cursor: Option<String>) -> Value {
    let mut result = json!({ key: page });
    if let Some(cursor) = next_cursor {
        result["nextCursor"] = json!(cursor);
    }
    result
}
