//! Variant ranking.
//!
//! During initialization the registered variants are ordered for the client:
//! the first element of the ranked list is the recommended default and
//! becomes the session default for requests that carry no explicit selector.

use std::sync::Arc;

use super::{ServerVariant, VariantHints, VariantStatus};

/// A ranking function orders variants by relevance to the client's hints,
/// most relevant first. It receives a copy of the registered variants and
/// may filter; the returned slice never aliases registry storage.
///
/// Each [`ServerVariant`] carries its priority (set at registration), which
/// ranking functions may use as a baseline signal alongside client hints.
pub type RankingFn =
    Arc<dyn Fn(&VariantHints, Vec<ServerVariant>) -> Vec<ServerVariant> + Send + Sync>;

/// Sort weight for a status. Lower is better:
/// stable < experimental < deprecated.
pub(crate) fn status_weight(status: VariantStatus) -> u8 {
    match status {
        VariantStatus::Stable => 0,
        VariantStatus::Experimental => 1,
        VariantStatus::Deprecated => 2,
    }
}

/// The built-in ranking used when no custom function is provided: a stable
/// sort by `(priority, status weight)`, so distinct priorities order by
/// ascending priority and ties break stable-before-experimental-before-
/// deprecated.
pub fn default_ranking(_hints: &VariantHints, mut variants: Vec<ServerVariant>) -> Vec<ServerVariant> {
    variants.sort_by_key(|v| (v.priority(), status_weight(v.effective_status())));
    variants
}

/// Promote the first stable variant to the front of a ranked list.
///
/// The recommended default (index 0) ought to be stable unless the client
/// explicitly accepted experimental variants through its hints. Relative
/// order of all other variants is preserved. Lists without any stable
/// variant are returned unchanged.
pub fn promote_stable_first(
    hints: &VariantHints,
    mut ranked: Vec<ServerVariant>,
) -> Vec<ServerVariant> {
    if hints.accepts_experimental() {
        return ranked;
    }
    if ranked.first().map(ServerVariant::is_stable).unwrap_or(true) {
        return ranked;
    }
    if let Some(pos) = ranked.iter().position(ServerVariant::is_stable) {
        let stable = ranked.remove(pos);
        ranked.insert(0, stable);
    }
    ranked
}
