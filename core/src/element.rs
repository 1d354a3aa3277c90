//! Auditable-element bookkeeping
//!
//! An element is one auditable input of a page (form field, link parameter,
//! cookie, header). Elements are tracked by opaque stable ids so instances
//! can agree on audit scope without exchanging page bodies.

use std::collections::{BTreeMap, BTreeSet};

use bloomfilter::Bloom;
use serde::{Deserialize, Serialize};

/// Stable opaque identifier for one auditable element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// URL → set of element ids discovered on that page.
///
/// Grows monotonically during the crawl phase; the partitioner reads a
/// frozen snapshot once distribution starts. Ordered maps keep iteration
/// deterministic for partitioning and tests.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ElementIdMap {
    entries: BTreeMap<String, BTreeSet<ElementId>>,
}

impl ElementIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge ids into the per-URL set (set union).
    pub fn record<I>(&mut self, url: &str, ids: I)
    where
        I: IntoIterator<Item = ElementId>,
    {
        self.entries.entry(url.to_string()).or_default().extend(ids);
    }

    pub fn ids_for(&self, url: &str) -> Option<&BTreeSet<ElementId>> {
        self.entries.get(url)
    }

    /// Merge another map into this one. Union per URL, so the operation is
    /// commutative and safe under unordered delivery from multiple slaves.
    pub fn merge(&mut self, other: ElementIdMap) {
        for (url, ids) in other.entries {
            self.entries.entry(url).or_default().extend(ids);
        }
    }

    /// All distinct ids across every URL.
    pub fn all_ids(&self) -> BTreeSet<ElementId> {
        self.entries.values().flatten().cloned().collect()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expected element cardinality for filter sizing.
const FILTER_CAPACITY: usize = 1_000_000;
/// Target false-positive rate at capacity.
const FILTER_FP_RATE: f64 = 0.001;

/// Probabilistic set of element ids already forwarded upstream.
///
/// Slaves run every freshly discovered id through this filter and only
/// report the remainder, suppressing redundant upward traffic. A false
/// positive merely drops one report of an id the master almost certainly
/// already has.
pub struct ElementIdFilter {
    bloom: Bloom<ElementId>,
}

impl ElementIdFilter {
    pub fn new() -> Self {
        Self {
            bloom: Bloom::new_for_fp_rate(FILTER_CAPACITY, FILTER_FP_RATE),
        }
    }

    /// Drop ids already seen, insert and return the rest.
    pub fn filter<I>(&mut self, ids: I) -> Vec<ElementId>
    where
        I: IntoIterator<Item = ElementId>,
    {
        let mut fresh = Vec::new();
        for id in ids {
            if !self.bloom.check(&id) {
                self.bloom.set(&id);
                fresh.push(id);
            }
        }
        fresh
    }
}

impl Default for ElementIdFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ElementIdFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementIdFilter").finish_non_exhaustive()
    }
}
