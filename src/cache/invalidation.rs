//! Targeted invalidation
//!
//! Keys are one-way hashes, so invalidation relies on the tags recorded with
//! each entry at `put` time. Tagging must be conservative: every entry that
//! could go stale when a student or cohort changes must carry that student's
//! or cohort's tag. A missing tag lets an educator see a stale insight; an
//! extra tag only costs one future miss.
//!
//! The store keeps a side index `tag -> keys` under the same lock as the
//! entries, so an invalidation is linearizable with concurrent reads.

use crate::cache::category::{AnalysisCategory, ScopeKind};
use crate::cache::key::CacheKey;
use crate::cache::store::AnalysisCache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

/// Identifier recorded with an entry for later bulk invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationTag {
    /// A single entity, usually a student id
    Entity { id: String },

    /// A cohort scope (e.g. a course section), optionally narrowed to a sub-scope
    Cohort {
        scope: String,
        sub_scope: Option<String>,
    },
}

impl InvalidationTag {
    /// Entity tag
    pub fn entity(id: impl Into<String>) -> Self {
        InvalidationTag::Entity { id: id.into() }
    }

    /// Whole-cohort tag
    pub fn cohort(scope: impl Into<String>) -> Self {
        InvalidationTag::Cohort {
            scope: scope.into(),
            sub_scope: None,
        }
    }

    /// Cohort tag narrowed to a sub-scope
    pub fn cohort_sub(scope: impl Into<String>, sub_scope: impl Into<String>) -> Self {
        InvalidationTag::Cohort {
            scope: scope.into(),
            sub_scope: Some(sub_scope.into()),
        }
    }

    /// Whether a cohort change event for `(scope_id, sub_scope)` makes this tag stale.
    ///
    /// A change to a whole scope hits every sub-scope; a change to one
    /// sub-scope hits that sub-scope and entries recorded for the whole scope.
    pub fn matches_cohort(&self, scope_id: &str, changed_sub: Option<&str>) -> bool {
        match self {
            InvalidationTag::Cohort { scope, sub_scope } if scope == scope_id => {
                match (changed_sub, sub_scope.as_deref()) {
                    (None, _) | (Some(_), None) => true,
                    (Some(changed), Some(recorded)) => changed == recorded,
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for InvalidationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationTag::Entity { id } => write!(f, "entity:{}", id),
            InvalidationTag::Cohort {
                scope,
                sub_scope: None,
            } => write!(f, "cohort:{}", scope),
            InvalidationTag::Cohort {
                scope,
                sub_scope: Some(sub),
            } => write!(f, "cohort:{}/{}", scope, sub),
        }
    }
}

/// Set of invalidation tags recorded with one entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<InvalidationTag>);

impl TagSet {
    /// Empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag set for an analysis about one student
    pub fn for_student(student_id: impl Into<String>) -> Self {
        Self::new().entity(student_id)
    }

    /// Add an entity tag
    pub fn entity(mut self, id: impl Into<String>) -> Self {
        self.0.insert(InvalidationTag::entity(id));
        self
    }

    /// Add a whole-cohort tag
    pub fn cohort(mut self, scope: impl Into<String>) -> Self {
        self.0.insert(InvalidationTag::cohort(scope));
        self
    }

    /// Add a cohort sub-scope tag
    pub fn cohort_sub(mut self, scope: impl Into<String>, sub_scope: impl Into<String>) -> Self {
        self.0.insert(InvalidationTag::cohort_sub(scope, sub_scope));
        self
    }

    /// Insert a tag
    pub fn insert(&mut self, tag: InvalidationTag) -> bool {
        self.0.insert(tag)
    }

    /// Whether the set holds `tag`
    pub fn contains(&self, tag: &InvalidationTag) -> bool {
        self.0.contains(tag)
    }

    /// Whether the set holds an entity tag for `id`
    pub fn contains_entity(&self, id: &str) -> bool {
        self.0
            .iter()
            .any(|tag| matches!(tag, InvalidationTag::Entity { id: tagged } if tagged == id))
    }

    /// Whether the set holds at least one tag of the given scope kind
    pub fn covers_scope(&self, scope: ScopeKind) -> bool {
        self.0.iter().any(|tag| match (scope, tag) {
            (ScopeKind::Entity, InvalidationTag::Entity { .. }) => true,
            (ScopeKind::Cohort, InvalidationTag::Cohort { .. }) => true,
            _ => false,
        })
    }

    /// Iterate over tags
    pub fn iter(&self) -> impl Iterator<Item = &InvalidationTag> {
        self.0.iter()
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<InvalidationTag> for TagSet {
    fn from_iter<I: IntoIterator<Item = InvalidationTag>>(iter: I) -> Self {
        TagSet(iter.into_iter().collect())
    }
}

/// Change notification raised by the persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// Data of one entity (student, intervention) changed
    EntityChanged { entity_id: String },

    /// Data within a cohort scope changed
    CohortChanged {
        scope_id: String,
        sub_scope: Option<String>,
    },
}

/// Reason an entry left the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidationReason {
    /// Entry reached its TTL
    Expired,

    /// Evicted as least recently used under capacity pressure
    Evicted,

    /// Removed explicitly by key
    Manual,

    /// Tagged entity changed
    EntityChanged { entity_id: String },

    /// Tagged cohort changed
    CohortChanged {
        scope_id: String,
        sub_scope: Option<String>,
    },

    /// Whole category flushed by an operator
    CategoryFlushed { category: AnalysisCategory },

    /// Whole cache cleared
    Cleared,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Evicted => write!(f, "LRU eviction"),
            InvalidationReason::Manual => write!(f, "manual removal"),
            InvalidationReason::EntityChanged { entity_id } => {
                write!(f, "entity changed: {}", entity_id)
            }
            InvalidationReason::CohortChanged {
                scope_id,
                sub_scope: None,
            } => write!(f, "cohort changed: {}", scope_id),
            InvalidationReason::CohortChanged {
                scope_id,
                sub_scope: Some(sub),
            } => write!(f, "cohort changed: {}/{}", scope_id, sub),
            InvalidationReason::CategoryFlushed { category } => {
                write!(f, "category flushed: {}", category)
            }
            InvalidationReason::Cleared => write!(f, "cache cleared"),
        }
    }
}

/// Record of one invalidation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were removed
    pub keys: Vec<CacheKey>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<CacheKey>, timestamp: DateTime<Utc>) -> Self {
        Self {
            reason,
            timestamp,
            keys,
        }
    }

    /// Number of removed entries
    pub fn count(&self) -> usize {
        self.keys.len()
    }
}

impl AnalysisCache {
    /// Remove every entry, in every category, tagged with `entity_id`
    pub async fn invalidate_entity(&self, entity_id: &str) -> usize {
        self.invalidate_entity_event(entity_id).await.count()
    }

    /// Remove every cohort-scoped entry recorded for `scope_id`
    /// (and `sub_scope`, when given)
    pub async fn invalidate_cohort(&self, scope_id: &str, sub_scope: Option<&str>) -> usize {
        self.invalidate_cohort_event(scope_id, sub_scope).await.count()
    }

    /// Remove every entry of one category
    pub async fn invalidate_category(&self, category: AnalysisCategory) -> usize {
        let mut store = self.store.write().await;

        let keys = store.keys_in_category(category);
        let removed = store.remove_keys(&keys);
        store.stats.record_invalidations(removed);

        info!(
            "Invalidated {} entries ({})",
            removed,
            InvalidationReason::CategoryFlushed { category }
        );
        removed
    }

    /// Apply a change notification from the persistence layer
    pub async fn handle_change(&self, event: ChangeEvent) -> InvalidationEvent {
        match event {
            ChangeEvent::EntityChanged { entity_id } => self.invalidate_entity_event(&entity_id).await,
            ChangeEvent::CohortChanged {
                scope_id,
                sub_scope,
            } => self.invalidate_cohort_event(&scope_id, sub_scope.as_deref()).await,
        }
    }

    async fn invalidate_entity_event(&self, entity_id: &str) -> InvalidationEvent {
        let tag = InvalidationTag::entity(entity_id);
        let mut store = self.store.write().await;
        let now = self.clock.now();

        store.mark_entity(entity_id);
        let keys = store.keys_for_tag(&tag);
        let removed = store.remove_keys(&keys);
        store.stats.record_invalidations(removed);

        if removed > 0 {
            info!("Invalidated {} entries for entity {}", removed, entity_id);
        } else {
            debug!("No cached entries for entity {}", entity_id);
        }

        InvalidationEvent::new(
            InvalidationReason::EntityChanged {
                entity_id: entity_id.to_string(),
            },
            keys,
            now,
        )
    }

    async fn invalidate_cohort_event(
        &self,
        scope_id: &str,
        sub_scope: Option<&str>,
    ) -> InvalidationEvent {
        let mut store = self.store.write().await;
        let now = self.clock.now();

        store.mark_cohort(scope_id, sub_scope);
        let keys = store.keys_matching_tags(|tag| tag.matches_cohort(scope_id, sub_scope));
        let removed = store.remove_keys(&keys);
        store.stats.record_invalidations(removed);

        if removed > 0 {
            info!(
                "Invalidated {} entries for cohort {}{}",
                removed,
                scope_id,
                sub_scope.map(|s| format!("/{}", s)).unwrap_or_default()
            );
        }

        InvalidationEvent::new(
            InvalidationReason::CohortChanged {
                scope_id: scope_id.to_string(),
                sub_scope: sub_scope.map(str::to_string),
            },
            keys,
            now,
        )
    }
}
