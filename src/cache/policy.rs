//! Per-category caching policy: TTL, ignored input fields and call-level overrides

use crate::cache::category::AnalysisCategory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Input fields that never influence the generated analysis
pub const DEFAULT_IGNORED_FIELDS: &[&str] = &[
    "display_name",
    "student_name",
    "first_name",
    "last_name",
    "email",
    "request_id",
    "requested_at",
];

/// Caching policy of a single analysis category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    /// Maximum entry age. Zero disables caching for the category.
    pub ttl: Duration,

    /// Mapping keys dropped during canonicalization, at any depth
    pub ignored_fields: BTreeSet<String>,
}

impl CategoryPolicy {
    /// Policy with the given TTL and the default ignored fields
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ignored_fields: DEFAULT_IGNORED_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Default policy for a category
    pub fn for_category(category: AnalysisCategory) -> Self {
        Self::with_ttl(Duration::from_secs(category.default_ttl_minutes() * 60))
    }

    /// Whether this policy disables caching
    pub fn is_disabled(&self) -> bool {
        self.ttl.is_zero()
    }
}

/// Per-call cache controls supplied with a lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupParams {
    /// Replaces the category TTL for the entry written by this call
    pub ttl_override: Option<Duration>,

    /// Skip the cache read (the caller always regenerates)
    pub bypass_cache: bool,

    /// Also skip writing the regenerated result
    pub skip_write: bool,
}

impl LookupParams {
    /// Params with a TTL override
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl_override: Some(ttl),
            ..Default::default()
        }
    }

    /// Params that bypass the read but still refresh the cache
    pub fn refresh() -> Self {
        Self {
            bypass_cache: true,
            ..Default::default()
        }
    }

    /// Params that neither read nor write
    pub fn no_cache() -> Self {
        Self {
            bypass_cache: true,
            skip_write: true,
            ..Default::default()
        }
    }
}

/// Maps every analysis category to its policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRegistry {
    policies: HashMap<AnalysisCategory, CategoryPolicy>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let policies = AnalysisCategory::ALL
            .iter()
            .map(|&category| (category, CategoryPolicy::for_category(category)))
            .collect();
        Self { policies }
    }
}

impl PolicyRegistry {
    /// Registry with the default policy for every category
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy of a category
    pub fn policy(&self, category: AnalysisCategory) -> CategoryPolicy {
        self.policies
            .get(&category)
            .cloned()
            .unwrap_or_else(|| CategoryPolicy::for_category(category))
    }

    /// TTL of a category
    pub fn ttl(&self, category: AnalysisCategory) -> Duration {
        self.policies
            .get(&category)
            .map(|p| p.ttl)
            .unwrap_or_else(|| CategoryPolicy::for_category(category).ttl)
    }

    /// Effective TTL of a write, honoring a per-call override
    pub fn resolve_ttl(&self, category: AnalysisCategory, params: &LookupParams) -> Duration {
        params.ttl_override.unwrap_or_else(|| self.ttl(category))
    }

    /// Whether a mapping key is dropped when canonicalizing input of this category
    pub fn is_ignored_field(&self, category: AnalysisCategory, field: &str) -> bool {
        match self.policies.get(&category) {
            Some(policy) => policy.ignored_fields.contains(field),
            None => DEFAULT_IGNORED_FIELDS.contains(&field),
        }
    }

    /// Replace the policy of a category
    pub fn set_policy(&mut self, category: AnalysisCategory, policy: CategoryPolicy) {
        self.policies.insert(category, policy);
    }

    /// Replace only the TTL of a category
    pub fn set_ttl(&mut self, category: AnalysisCategory, ttl: Duration) {
        self.policies
            .entry(category)
            .or_insert_with(|| CategoryPolicy::for_category(category))
            .ttl = ttl;
    }

    /// Builder-style TTL setter
    pub fn with_ttl(mut self, category: AnalysisCategory, ttl: Duration) -> Self {
        self.set_ttl(category, ttl);
        self
    }

    /// Builder-style: add a field to the ignored set of a category
    pub fn with_ignored_field(mut self, category: AnalysisCategory, field: impl Into<String>) -> Self {
        self.policies
            .entry(category)
            .or_insert_with(|| CategoryPolicy::for_category(category))
            .ignored_fields
            .insert(field.into());
        self
    }
}
