//! Server capability advertisement and the variant union.
//!
//! The front proxy server advertises the union of every variant's
//! capabilities so that a feature reachable through at least one variant is
//! negotiable on the front session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::Meta;

/// Tool-related capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapabilities {
    /// Whether the server emits `notifications/tools/list_changed`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub list_changed: bool,
}

/// Resource-related capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCapabilities {
    /// Whether `resources/subscribe` is supported
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub subscribe: bool,
    /// Whether the server emits `notifications/resources/list_changed`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub list_changed: bool,
}

/// Prompt-related capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    /// Whether the server emits `notifications/prompts/list_changed`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub list_changed: bool,
}

/// Marker capability: `completion/complete` is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompletionCapabilities {}

/// Marker capability: logging notifications are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingCapabilities {}

/// The full capability set a server advertises during initialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapabilities>,
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Meta>,
}

/// Merge multiple capability sets into the single set the front proxy
/// server advertises.
///
/// The merge strategy is:
///
/// - Tools, Resources, Prompts: the capability is advertised if any variant
///   advertises it. Boolean sub-flags (`listChanged`, `subscribe`) are OR-ed
///   across all variants so the front server enables the feature if at least
///   one inner server supports it.
/// - Completions, Logging: marker capabilities. Advertised if any variant
///   advertises them; the first present value is kept.
/// - Experimental: keys are merged into a single map. The first variant to
///   register a given key wins; later duplicates are ignored.
pub fn union_capabilities(all: &[ServerCapabilities]) -> ServerCapabilities {
    let mut union = ServerCapabilities::default();

    for caps in all {
        if let Some(tools) = &caps.tools {
            let entry = union.tools.get_or_insert_with(ToolCapabilities::default);
            entry.list_changed = entry.list_changed || tools.list_changed;
        }

        if let Some(resources) = &caps.resources {
            let entry = union
                .resources
                .get_or_insert_with(ResourceCapabilities::default);
            entry.subscribe = entry.subscribe || resources.subscribe;
            entry.list_changed = entry.list_changed || resources.list_changed;
        }

        if let Some(prompts) = &caps.prompts {
            let entry = union
                .prompts
                .get_or_insert_with(PromptCapabilities::default);
            entry.list_changed = entry.list_changed || prompts.list_changed;
        }

        if caps.completions.is_some() && union.completions.is_none() {
            union.completions = caps.completions;
        }
        if caps.logging.is_some() && union.logging.is_none() {
            union.logging = caps.logging;
        }

        if let Some(experimental) = &caps.experimental {
            let entry = union.experimental.get_or_insert_with(Meta::new);
            for (key, value) in experimental {
                entry
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    union
}

/// Convenience: is a boolean sub-flag set anywhere in the set?
impl ServerCapabilities {
    /// True if `resources/subscribe` is negotiable.
    pub fn supports_subscribe(&self) -> bool {
        self.resources.map(|r| r.subscribe).unwrap_or(false)
    }

    /// Look up an experimental capability payload by key.
    pub fn experimental_entry(&self, key: &str) -> Option<&Value> {
        self.experimental.as_ref()?.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caps(value: Value) -> ServerCapabilities {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_union_of_empty_is_empty() {
        let union = union_capabilities(&[]);
        assert_eq!(union, ServerCapabilities::default());
        let wire = serde_json::to_value(&union).unwrap();
        assert_eq!(wire, json!({}));
    }

    #[test]
    fn test_union_exposes_capability_iff_any_input_does() {
        let a = caps(json!({"tools": {}}));
        let b = caps(json!({"prompts": {}}));

        let union = union_capabilities(&[a, b]);
        assert!(union.tools.is_some());
        assert!(union.prompts.is_some());
        assert!(union.resources.is_none());
        assert!(union.completions.is_none());
    }

    #[test]
    fn test_union_ors_boolean_subflags() {
        let a = caps(json!({
            "tools": {"listChanged": true},
            "resources": {"subscribe": false}
        }));
        let b = caps(json!({
            "tools": {"listChanged": false},
            "resources": {"subscribe": true, "listChanged": true}
        }));

        let union = union_capabilities(&[a, b]);
        assert!(union.tools.unwrap().list_changed);
        let resources = union.resources.unwrap();
        assert!(resources.subscribe);
        assert!(resources.list_changed);
    }

    #[test]
    fn test_union_subflag_false_when_false_everywhere() {
        let a = caps(json!({"tools": {}}));
        let b = caps(json!({"tools": {}}));

        let union = union_capabilities(&[a, b]);
        assert!(!union.tools.unwrap().list_changed);
    }

    #[test]
    fn test_union_markers_first_present_wins() {
        let a = caps(json!({"logging": {}}));
        let b = caps(json!({"completions": {}, "logging": {}}));

        let union = union_capabilities(&[a, b]);
        assert!(union.logging.is_some());
        assert!(union.completions.is_some());
    }

    #[test]
    fn test_union_experimental_first_writer_wins() {
        let a = caps(json!({"experimental": {"x": {"from": "a"}}}));
        let b = caps(json!({"experimental": {"x": {"from": "b"}, "y": 1}}));

        let union = union_capabilities(&[a, b]);
        let experimental = union.experimental.unwrap();
        assert_eq!(experimental["x"], json!({"from": "a"}));
        assert_eq!(experimental["y"], json!(1));
    }

    #[test]
    fn test_false_subflags_omitted_on_wire() {
        let union = union_capabilities(&[caps(json!({"tools": {}}))]);
        let wire = serde_json::to_value(&union).unwrap();
        assert_eq!(wire, json!({"tools": {}}));
    }
}
