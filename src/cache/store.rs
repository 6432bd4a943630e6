//! Main cache store implementation with TTL expiry and LRU eviction

use crate::cache::{
    category::AnalysisCategory,
    clock::{Clock, SystemClock},
    config::CacheConfig,
    entry::{AnalysisPayload, CacheEntry},
    invalidation::{InvalidationReason, InvalidationTag, TagSet},
    key::{CacheKey, CacheKeyBuilder},
    policy::{LookupParams, PolicyRegistry},
    stats::{CacheStats, StatsCollector},
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Analysis cache with per-category TTL, LRU eviction and tag-based invalidation
///
/// One `RwLock` guards the entries, the LRU order, the tag index and the
/// counters, so every operation is linearizable: once a removal returns, no
/// later `get` from any task observes the entry. No operation performs I/O
/// while holding the lock.
pub struct AnalysisCache {
    /// Cache configuration
    pub(crate) config: CacheConfig,

    /// Source of timestamps
    pub(crate) clock: Arc<dyn Clock>,

    /// Internal storage
    pub(crate) store: RwLock<CacheStore>,
}

/// LRU order: last access, then creation, then insertion sequence
type LruRank = (DateTime<Utc>, DateTime<Utc>, u64);

/// Internal cache storage
pub(crate) struct CacheStore {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// Entries ordered from least to most recently used
    lru_index: BTreeMap<LruRank, CacheKey>,

    /// Side index: tag -> keys of entries carrying it
    tag_index: HashMap<InvalidationTag, HashSet<CacheKey>>,

    /// Monotonic counters
    pub(crate) stats: StatsCollector,

    /// Next insertion sequence number
    next_seq: u64,

    /// Bumped by every entity or cohort invalidation
    invalidation_epoch: u64,

    /// Epoch of the last invalidation of each entity
    entity_marks: HashMap<String, u64>,

    /// Epoch of the last invalidation of each cohort scope, per changed sub-scope
    cohort_marks: HashMap<String, HashMap<Option<String>, u64>>,
}

/// Payload and metadata returned by a cache hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHit {
    /// Key that was hit
    pub key: CacheKey,

    /// Category of the cached analysis
    pub category: AnalysisCategory,

    /// The cached analysis
    pub payload: AnalysisPayload,

    /// When the analysis was cached
    pub cached_at: DateTime<Utc>,

    /// Hits served for this entry, including this one
    pub hit_count: u64,

    /// When the entry stops being served
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheHit {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            category: entry.category,
            payload: entry.payload.clone(),
            cached_at: entry.created_at,
            hit_count: entry.access_count,
            expires_at: entry.expires_at(),
        }
    }
}

/// What a `put` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// New entry stored, possibly after evicting the least recently used one
    Inserted { evicted: Option<CacheKey> },

    /// Existing entry for the key replaced
    Replaced,

    /// Nothing stored: the caller opted out or the effective TTL is zero
    Skipped,

    /// Nothing stored: a tag of the entry was invalidated after the
    /// payload's inputs were read
    Stale,
}

impl PutOutcome {
    /// Whether the payload is now cached
    pub fn is_stored(&self) -> bool {
        !matches!(self, PutOutcome::Skipped | PutOutcome::Stale)
    }
}

impl CacheStore {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            lru_index: BTreeMap::new(),
            tag_index: HashMap::new(),
            stats: StatsCollector::default(),
            next_seq: 0,
            invalidation_epoch: 0,
            entity_marks: HashMap::new(),
            cohort_marks: HashMap::new(),
        }
    }

    /// Record that an entity's data changed
    pub(crate) fn mark_entity(&mut self, entity_id: &str) {
        self.invalidation_epoch += 1;
        self.entity_marks
            .insert(entity_id.to_string(), self.invalidation_epoch);
    }

    /// Record that a cohort scope (or one sub-scope) changed
    pub(crate) fn mark_cohort(&mut self, scope_id: &str, sub_scope: Option<&str>) {
        self.invalidation_epoch += 1;
        self.cohort_marks
            .entry(scope_id.to_string())
            .or_default()
            .insert(sub_scope.map(str::to_string), self.invalidation_epoch);
    }

    /// Whether any of `tags` was invalidated after epoch `since`
    fn invalidated_since(&self, tags: &TagSet, since: u64) -> bool {
        tags.iter().any(|tag| match tag {
            InvalidationTag::Entity { id } => self
                .entity_marks
                .get(id)
                .is_some_and(|&epoch| epoch > since),
            InvalidationTag::Cohort { scope, .. } => {
                self.cohort_marks.get(scope).is_some_and(|marks| {
                    marks.iter().any(|(changed, &epoch)| {
                        epoch > since && tag.matches_cohort(scope, changed.as_deref())
                    })
                })
            }
        })
    }

    /// Insert an entry, replacing any entry under the same key
    fn insert(&mut self, mut entry: CacheEntry) -> Option<CacheEntry> {
        let replaced = self.remove_entry(&entry.key);

        entry.seq = self.next_seq;
        self.next_seq += 1;

        self.lru_index.insert(entry.lru_rank(), entry.key.clone());
        for tag in entry.tags.iter() {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        self.entries.insert(entry.key.clone(), entry);

        replaced
    }

    /// Remove an entry and unlink it from both indexes
    pub(crate) fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;

        self.lru_index.remove(&entry.lru_rank());
        for tag in entry.tags.iter() {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }

        Some(entry)
    }

    /// Remove a batch of keys, returning how many were present
    pub(crate) fn remove_keys(&mut self, keys: &[CacheKey]) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.remove_entry(key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Record a read hit and move the entry to the most-recent end
    fn touch(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<&CacheEntry> {
        let entry = self.entries.get_mut(key)?;
        self.lru_index.remove(&entry.lru_rank());
        entry.mark_accessed(now);
        self.lru_index.insert(entry.lru_rank(), key.clone());
        Some(entry)
    }

    /// Evict the least recently used entry
    fn evict_lru(&mut self) -> Option<CacheEntry> {
        let key = self.lru_index.values().next()?.clone();
        self.remove_entry(&key)
    }

    fn expired_keys(&self, now: DateTime<Utc>) -> Vec<CacheKey> {
        self.entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Keys of entries carrying exactly `tag`
    pub(crate) fn keys_for_tag(&self, tag: &InvalidationTag) -> Vec<CacheKey> {
        self.tag_index
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys of entries carrying any tag accepted by `predicate`
    pub(crate) fn keys_matching_tags<F>(&self, predicate: F) -> Vec<CacheKey>
    where
        F: Fn(&InvalidationTag) -> bool,
    {
        let keys: HashSet<&CacheKey> = self
            .tag_index
            .iter()
            .filter(|(tag, _)| predicate(tag))
            .flat_map(|(_, keys)| keys.iter())
            .collect();
        keys.into_iter().cloned().collect()
    }

    /// Keys of all entries of one category
    pub(crate) fn keys_in_category(&self, category: AnalysisCategory) -> Vec<CacheKey> {
        self.entries
            .values()
            .filter(|entry| entry.category == category)
            .map(|entry| entry.key.clone())
            .collect()
    }

    fn entries_by_category(&self) -> BTreeMap<AnalysisCategory, usize> {
        let mut counts: BTreeMap<AnalysisCategory, usize> =
            AnalysisCategory::ALL.iter().map(|&c| (c, 0)).collect();
        for entry in self.entries.values() {
            *counts.entry(entry.category).or_insert(0) += 1;
        }
        counts
    }
}

impl AnalysisCache {
    /// Create a cache on the wall clock
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit time source
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        info!(
            "Initializing analysis cache (capacity: {}, key hash length: {})",
            config.capacity, config.key_hash_len
        );

        let store = CacheStore::new(config.capacity);

        Ok(Self {
            config,
            clock,
            store: RwLock::new(store),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Per-category policies
    pub fn policies(&self) -> &PolicyRegistry {
        &self.config.policies
    }

    /// Key builder matching this cache's policies and key length
    pub fn key_builder(&self) -> CacheKeyBuilder {
        CacheKeyBuilder::new(self.config.policies.clone(), self.config.key_hash_len)
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Look up an entry. Expired entries are dropped and reported as misses.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        let mut store = self.store.write().await;
        let now = self.clock.now();

        let expired = match store.entries.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                debug!("Cache miss: {}", key);
                store.stats.record_miss();
                return None;
            }
        };

        if expired {
            debug!("Cache entry expired: {}", key);
            store.remove_entry(key);
            store.stats.record_expirations(1);
            store.stats.record_miss();
            return None;
        }

        let hit = store.touch(key, now).map(CacheHit::from_entry)?;
        store.stats.record_hit(hit.payload.token_cost);

        debug!("Cache hit: {} (hit #{})", key, hit.hit_count);
        Some(hit)
    }

    /// Store a payload using the category TTL
    pub async fn put(
        &self,
        key: CacheKey,
        category: AnalysisCategory,
        payload: AnalysisPayload,
        tags: TagSet,
    ) -> PutOutcome {
        self.put_with_params(key, category, payload, tags, &LookupParams::default())
            .await
    }

    /// Store a payload honoring per-call TTL override and write opt-out
    pub async fn put_with_params(
        &self,
        key: CacheKey,
        category: AnalysisCategory,
        payload: AnalysisPayload,
        tags: TagSet,
        params: &LookupParams,
    ) -> PutOutcome {
        self.write_entry(key, category, payload, tags, params, None)
            .await
    }

    /// Current invalidation epoch. Read it before fetching the inputs of a
    /// reasoning call and pass it to [`AnalysisCache::put_if_unchanged`].
    pub async fn invalidation_epoch(&self) -> u64 {
        self.store.read().await.invalidation_epoch
    }

    /// Like [`AnalysisCache::put_with_params`], but refuses the write with
    /// [`PutOutcome::Stale`] when an entity or cohort named in `tags` was
    /// invalidated after epoch `since`.
    pub async fn put_if_unchanged(
        &self,
        key: CacheKey,
        category: AnalysisCategory,
        payload: AnalysisPayload,
        tags: TagSet,
        params: &LookupParams,
        since: u64,
    ) -> PutOutcome {
        self.write_entry(key, category, payload, tags, params, Some(since))
            .await
    }

    async fn write_entry(
        &self,
        key: CacheKey,
        category: AnalysisCategory,
        payload: AnalysisPayload,
        tags: TagSet,
        params: &LookupParams,
        since: Option<u64>,
    ) -> PutOutcome {
        let ttl = self.config.policies.resolve_ttl(category, params);
        let mut store = self.store.write().await;

        if params.skip_write || ttl.is_zero() {
            debug!("Skipping cache write for {} (ttl: {:?})", key, ttl);
            store.stats.record_skipped_write();
            return PutOutcome::Skipped;
        }

        if let Some(since) = since {
            if store.invalidated_since(&tags, since) {
                debug!("Dropping stale cache write for {}", key);
                store.stats.record_stale_write();
                return PutOutcome::Stale;
            }
        }

        let scope = category.scope_kind();
        if !tags.covers_scope(scope) {
            warn!(
                "Cache entry {} ({}) has no {:?} tag and will not be invalidated by data changes",
                key, category, scope
            );
            store.stats.record_under_tagged_write();
        }

        let mut evicted = None;
        if !store.entries.contains_key(&key) {
            while store.entries.len() >= self.config.capacity {
                match store.evict_lru() {
                    Some(old) => {
                        debug!("Evicting {} ({})", old.key, InvalidationReason::Evicted);
                        store.stats.record_eviction();
                        evicted = Some(old.key);
                    }
                    None => break,
                }
            }
        }

        let now = self.clock.now();
        let entry = CacheEntry::new(key.clone(), category, payload, tags, ttl, now);
        let replaced = store.insert(entry);
        store.stats.record_insert();

        if replaced.is_some() {
            debug!("Replaced cache entry: {}", key);
            PutOutcome::Replaced
        } else {
            debug!("Inserted cache entry: {}", key);
            PutOutcome::Inserted { evicted }
        }
    }

    /// Count a read the caller chose to skip
    pub async fn record_bypass(&self) {
        self.store.write().await.stats.record_bypass();
    }

    /// Check if a live entry exists (without updating access time)
    pub async fn contains_key(&self, key: &CacheKey) -> bool {
        let store = self.store.read().await;
        let now = self.clock.now();
        store
            .entries
            .get(key)
            .map(|entry| !entry.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Remove a specific entry from the cache
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let mut store = self.store.write().await;

        if store.remove_entry(key).is_some() {
            store.stats.record_invalidations(1);
            debug!("Removed cache entry: {} ({})", key, InvalidationReason::Manual);
            true
        } else {
            false
        }
    }

    /// Remove every expired entry, returning how many were removed
    pub async fn sweep(&self) -> usize {
        let mut store = self.store.write().await;
        let now = self.clock.now();

        let expired = store.expired_keys(now);
        let removed = store.remove_keys(&expired);
        store.stats.record_expirations(removed);

        if removed > 0 {
            debug!("Swept {} expired entries", removed);
        }
        removed
    }

    /// Clear all entries from the cache
    pub async fn clear(&self) -> usize {
        let mut store = self.store.write().await;

        let count = store.entries.len();
        store.entries.clear();
        store.lru_index.clear();
        store.tag_index.clear();
        store.stats.record_invalidations(count);

        info!("Removed {} entries ({})", count, InvalidationReason::Cleared);
        count
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        CacheStats::new(
            store.stats.clone(),
            self.config.capacity,
            store.entries_by_category(),
        )
    }

    /// Reset all counters (entries are kept)
    pub async fn reset_stats(&self) {
        self.store.write().await.stats = StatsCollector::default();
    }

    /// Get number of entries in cache, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Keys of entries carrying `tag`
    pub async fn keys_for_tag(&self, tag: &InvalidationTag) -> Vec<CacheKey> {
        self.store.read().await.keys_for_tag(tag)
    }
}
