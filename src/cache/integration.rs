//! Integration points for the insight generation pipeline
//!
//! The pipeline talks to the cache in request/response terms:
//! - build a [`CacheLookupRequest`] from the category and the request input
//! - on a miss, call the reasoning service and write a [`CacheWriteRequest`]
//! - forward change notifications from the persistence layer
//!
//! [`InsightCache::get_or_compute`] bundles the first two steps.

use crate::cache::{
    category::AnalysisCategory,
    config::CacheConfig,
    entry::AnalysisPayload,
    health::HealthReport,
    invalidation::{ChangeEvent, InvalidationEvent, TagSet},
    key::{CacheKey, CacheKeyBuilder},
    policy::LookupParams,
    stats::CacheStats,
    store::{AnalysisCache, PutOutcome},
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Cache lookup for one analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheLookupRequest {
    /// Kind of analysis requested
    pub category: AnalysisCategory,

    /// Data the analysis is generated from
    pub input_data: Value,

    /// Parameters of the reasoning call (model, temperature, prompt version)
    pub call_params: Value,

    /// Per-call cache controls
    #[serde(default)]
    pub params: LookupParams,
}

impl CacheLookupRequest {
    pub fn new(category: AnalysisCategory, input_data: Value) -> Self {
        Self {
            category,
            input_data,
            call_params: Value::Null,
            params: LookupParams::default(),
        }
    }

    /// Attach reasoning call parameters
    pub fn with_call_params(mut self, call_params: Value) -> Self {
        self.call_params = call_params;
        self
    }

    /// Attach cache controls
    pub fn with_params(mut self, params: LookupParams) -> Self {
        self.params = params;
        self
    }
}

/// Result written after a reasoning call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheWriteRequest {
    /// The lookup the result answers
    pub lookup: CacheLookupRequest,

    /// Generated analysis
    pub payload: AnalysisPayload,

    /// Identifiers whose change makes the result stale
    pub tags: TagSet,
}

/// Metadata attached to a hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitMetadata {
    pub cached_at: DateTime<Utc>,
    pub hit_count: u64,
}

/// Outcome of a lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLookupResult {
    /// Whether the payload came from the cache
    pub hit: bool,

    /// Derived key of the request
    pub key: CacheKey,

    /// Cached or freshly produced analysis
    pub payload: Option<AnalysisPayload>,

    /// Present on hits only
    pub metadata: Option<HitMetadata>,
}

impl CacheLookupResult {
    fn miss(key: CacheKey) -> Self {
        Self {
            hit: false,
            key,
            payload: None,
            metadata: None,
        }
    }
}

/// Insight cache facade
///
/// Derives keys from requests and forwards to a shared [`AnalysisCache`].
#[derive(Clone)]
pub struct InsightCache {
    cache: Arc<AnalysisCache>,
    keys: CacheKeyBuilder,
}

impl InsightCache {
    /// Create a facade over a new cache
    pub fn new(config: CacheConfig) -> Result<Self> {
        Ok(Self::from_cache(Arc::new(AnalysisCache::new(config)?)))
    }

    /// Wrap an existing cache
    pub fn from_cache(cache: Arc<AnalysisCache>) -> Self {
        let keys = cache.key_builder();
        Self { cache, keys }
    }

    /// Get the underlying cache
    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    /// Derive the key of a request
    pub fn key_for(&self, request: &CacheLookupRequest) -> CacheKey {
        self.keys
            .derive_key(request.category, &request.input_data, &request.call_params)
    }

    /// Look up a request; bypassed lookups always miss
    pub async fn lookup(&self, request: &CacheLookupRequest) -> CacheLookupResult {
        let key = self.key_for(request);

        if request.params.bypass_cache {
            debug!("Cache bypassed for {}", key);
            self.cache.record_bypass().await;
            return CacheLookupResult::miss(key);
        }

        match self.cache.get(&key).await {
            Some(hit) => CacheLookupResult {
                hit: true,
                key,
                payload: Some(hit.payload),
                metadata: Some(HitMetadata {
                    cached_at: hit.cached_at,
                    hit_count: hit.hit_count,
                }),
            },
            None => CacheLookupResult::miss(key),
        }
    }

    /// Store a reasoning result
    pub async fn store(&self, request: CacheWriteRequest) -> PutOutcome {
        let key = self.key_for(&request.lookup);
        self.cache
            .put_with_params(
                key,
                request.lookup.category,
                request.payload,
                request.tags,
                &request.lookup.params,
            )
            .await
    }

    /// Serve from cache, or run `produce` and cache its result.
    ///
    /// Errors from `produce` are returned unchanged and nothing is cached.
    /// A result whose tags were invalidated while `produce` ran is returned
    /// but not cached.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        request: &CacheLookupRequest,
        tags: TagSet,
        produce: F,
    ) -> std::result::Result<CacheLookupResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<AnalysisPayload, E>>,
    {
        let since = self.cache.invalidation_epoch().await;
        let lookup = self.lookup(request).await;
        if lookup.hit {
            return Ok(lookup);
        }

        let payload = produce().await?;
        let outcome = self
            .cache
            .put_if_unchanged(
                lookup.key.clone(),
                request.category,
                payload.clone(),
                tags,
                &request.params,
                since,
            )
            .await;
        if outcome == PutOutcome::Stale {
            debug!("Not caching {}: inputs changed during computation", lookup.key);
        }

        Ok(CacheLookupResult {
            hit: false,
            key: lookup.key,
            payload: Some(payload),
            metadata: None,
        })
    }

    /// Apply a change notification
    pub async fn handle_change(&self, event: ChangeEvent) -> InvalidationEvent {
        self.cache.handle_change(event).await
    }

    /// Invalidate everything tagged with a student or other entity
    pub async fn invalidate_entity(&self, entity_id: &str) -> usize {
        self.cache.invalidate_entity(entity_id).await
    }

    /// Invalidate cohort-scoped results
    pub async fn invalidate_cohort(&self, scope_id: &str, sub_scope: Option<&str>) -> usize {
        self.cache.invalidate_cohort(scope_id, sub_scope).await
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Sweep and classify the cache
    pub async fn health_check(&self) -> HealthReport {
        self.cache.health_check().await
    }

    /// Remove expired entries
    pub async fn sweep(&self) -> usize {
        self.cache.sweep().await
    }

    /// Clear all cached analyses
    pub async fn clear(&self) -> usize {
        self.cache.clear().await
    }
}
