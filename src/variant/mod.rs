//! Server variant descriptors, statuses and client hints.
//!
//! A *variant* is a named, self-contained packaging of tools, resources and
//! prompts belonging to a single MCP server. Clients discover variants
//! through an experimental capability on `initialize` and steer individual
//! requests with a `_meta` selector.

pub mod cursor;
pub mod ranking;
pub mod registry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Meta;

/// Experimental capability id used on `initialize` (note the plural).
pub const EXTENSION_CAPABILITY_ID: &str = "io.modelcontextprotocol/server-variants";

/// Per-request `_meta` key selecting a variant (note the singular).
pub const VARIANT_META_KEY: &str = "io.modelcontextprotocol/server-variant";

/// Well-known hint keys. Unknown keys MUST be ignored by clients and servers.
pub mod hint_keys {
    /// Target model family/provider ("anthropic", "openai", "local", ...).
    pub const MODEL_FAMILY: &str = "modelFamily";
    /// Intended usage scenario ("autonomous-agent", "ide", "chat", ...).
    pub const USE_CASE: &str = "useCase";
    /// Desired verbosity / token efficiency ("compact", "standard", ...).
    pub const CONTEXT_SIZE: &str = "contextSize";
    /// Client rendering support ("rich", "markdown", "text-only").
    pub const RENDERING_CAPABILITIES: &str = "renderingCapabilities";
    /// Natural-language optimization ("en", "multilingual", "code-focused").
    pub const LANGUAGE_OPTIMIZATION: &str = "languageOptimization";
    /// Stability opt-in: a client sending `"experimental"` under this key
    /// accepts a non-stable variant as its session default.
    pub const STATUS: &str = "status";
}

/// Stability status of a server variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantStatus {
    /// Production-ready, recommended for general use.
    Stable,
    /// May change without notice; use for testing.
    Experimental,
    /// Will be removed in a future release.
    Deprecated,
}

impl VariantStatus {
    /// Returns the wire format string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Experimental => "experimental",
            Self::Deprecated => "deprecated",
        }
    }
}

impl std::fmt::Display for VariantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VariantStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Self::Stable),
            "experimental" => Ok(Self::Experimental),
            "deprecated" => Ok(Self::Deprecated),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

impl Serialize for VariantStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VariantStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid variant status: '{0}'")]
pub struct ParseStatusError(String);

/// Migration guidance for deprecated variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeprecationInfo {
    /// Why this variant is deprecated and how to migrate.
    pub message: String,
    /// Suggested replacement variant identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// ISO 8601 date when this variant is planned to be removed. Servers
    /// SHOULD continue to support the variant until that date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_date: Option<String>,
}

/// Describes one server capability variant that clients can select.
///
/// Each variant represents a distinct configuration of all server
/// capabilities (tools, resources, prompts, subscriptions). Variant ids MUST
/// be unique within a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVariant {
    /// Unique identifier, freeform. Examples: "claude-optimized",
    /// "gpt-optimized", "compact", "agent-plan".
    pub id: String,

    /// Human-readable description suitable for display to users or for LLM
    /// reasoning about variant selection: target use case or model family,
    /// key characteristics, trade-offs against other variants.
    pub description: String,

    /// Key-value metadata for programmatic filtering and ranking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<BTreeMap<String, String>>,

    /// Stability status. Absent means stable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VariantStatus>,

    /// Migration guidance when the status is deprecated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecation_info: Option<DeprecationInfo>,

    /// Default-ordering priority; lower values rank higher (0 = highest).
    /// Set at registration, readable for custom ranking functions.
    #[serde(skip)]
    priority: i32,
}

impl ServerVariant {
    /// Create a variant with the given id and description.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            hints: None,
            status: None,
            deprecation_info: None,
            priority: 0,
        }
    }

    /// Attach a hint key/value pair.
    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the stability status.
    pub fn with_status(mut self, status: VariantStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach deprecation guidance.
    pub fn with_deprecation_info(mut self, info: DeprecationInfo) -> Self {
        self.deprecation_info = Some(info);
        self
    }

    /// The variant's priority value; lower means higher importance.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// Effective status: absent defaults to stable.
    pub fn effective_status(&self) -> VariantStatus {
        self.status.unwrap_or(VariantStatus::Stable)
    }

    /// True if this variant is (explicitly or by default) stable.
    pub fn is_stable(&self) -> bool {
        self.effective_status() == VariantStatus::Stable
    }
}

/// Structured hints provided by the client to bias variant ranking.
///
/// Hint values are either a single string or an ordered list of strings (in
/// order of preference). Extracted per `initialize` request, never stored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VariantHints {
    /// Human-readable description of the client's context and requirements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Key-value hint pairs. Unknown keys MUST be ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Meta>,
}

impl VariantHints {
    /// Raw hint value for `key`, if any.
    pub fn hint_value(&self, key: &str) -> Option<&Value> {
        self.hints.as_ref()?.get(key)
    }

    /// Hint values for `key` as strings: a string value yields one entry, a
    /// list yields its string elements in order, anything else is empty.
    pub fn hint_strings(&self, key: &str) -> Vec<&str> {
        match self.hint_value(key) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// True if the client opted into experimental variants as its default
    /// (hint key `status` containing `"experimental"`).
    pub fn accepts_experimental(&self) -> bool {
        self.hint_strings(hint_keys::STATUS)
            .iter()
            .any(|v| *v == VariantStatus::Experimental.as_str())
    }
}
