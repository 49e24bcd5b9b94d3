//! The variant registry: an ordered, immutable-after-construction mapping of
//! variant descriptors to their backends, plus the ranking function.

use std::sync::Arc;

use crate::backend::Backend;

use super::ranking::{RankingFn, default_ranking, promote_stable_first};
use super::{ServerVariant, VariantHints};

/// One registered variant: its descriptor bound to the backend that opens
/// inner sessions for it.
pub struct VariantEntry {
    /// The variant descriptor (carries the registration priority).
    pub variant: ServerVariant,
    /// The backend that connects to this variant's server.
    pub backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for VariantEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantEntry")
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

/// Ordered collection of registered variants.
///
/// Registration happens during a one-shot construction phase; afterwards the
/// registry is read-only and safe to share across sessions. Registering a
/// duplicate or empty id is a caller bug and panics.
#[derive(Default)]
pub struct VariantRegistry {
    entries: Vec<VariantEntry>,
    ranking: Option<RankingFn>,
}

impl std::fmt::Debug for VariantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantRegistry")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl VariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variant with its backend and priority.
    ///
    /// Lower priority values rank higher under the default ranking
    /// (0 = highest).
    ///
    /// # Panics
    ///
    /// Panics if the variant id is empty or already registered.
    pub fn register(&mut self, mut variant: ServerVariant, backend: Arc<dyn Backend>, priority: i32) {
        if variant.id.is_empty() {
            panic!("variantgate: empty variant ID");
        }
        if self.entries.iter().any(|e| e.variant.id == variant.id) {
            panic!("variantgate: duplicate variant ID: {}", variant.id);
        }
        variant.set_priority(priority);
        self.entries.push(VariantEntry { variant, backend });
    }

    /// Replace the ranking function used to order variants during
    /// initialization. `None` restores the default priority-based ranking.
    pub fn set_ranking(&mut self, ranking: Option<RankingFn>) {
        self.ranking = ranking;
    }

    /// All registered entries, in registration order.
    pub fn entries(&self) -> &[VariantEntry] {
        &self.entries
    }

    /// Look up an entry by variant id.
    pub fn get(&self, id: &str) -> Option<&VariantEntry> {
        self.entries.iter().find(|e| e.variant.id == id)
    }

    /// Copies of all registered descriptors, in registration order.
    pub fn variants(&self) -> Vec<ServerVariant> {
        self.entries.iter().map(|e| e.variant.clone()).collect()
    }

    /// Number of registered variants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The registered variants ranked for the given client hints, with the
    /// stable-first guarantee applied on top of whichever ranking ran.
    ///
    /// The returned vector is a fresh copy; callers may not assume it
    /// aliases registry storage.
    pub fn ranked(&self, hints: &VariantHints) -> Vec<ServerVariant> {
        let all = self.variants();
        if all.is_empty() {
            return all;
        }
        let ranked = match &self.ranking {
            Some(custom) => custom(hints, all),
            None => default_ranking(hints, all),
        };
        promote_stable_first(hints, ranked)
    }

    /// Ranked variant ids for the given hints.
    pub fn ranked_ids(&self, hints: &VariantHints) -> Vec<String> {
        self.ranked(hints).into_iter().map(|v| v.id).collect()
    }
}
