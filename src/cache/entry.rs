//! Cache entries and the analysis payload they carry

use crate::cache::category::AnalysisCategory;
use crate::cache::invalidation::TagSet;
use crate::cache::key::CacheKey;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of one reasoning call, plus what it cost to produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    /// Generated analysis (opaque to the cache)
    pub content: serde_json::Value,

    /// Tokens consumed by the reasoning call
    pub token_cost: u64,

    /// Wall time of the reasoning call in milliseconds
    pub latency_ms: u64,

    /// Model that produced the analysis
    pub model: Option<String>,
}

impl AnalysisPayload {
    /// Payload with no cost information
    pub fn new(content: serde_json::Value) -> Self {
        Self {
            content,
            token_cost: 0,
            latency_ms: 0,
            model: None,
        }
    }

    /// Attach the cost of the reasoning call
    pub fn with_cost(mut self, token_cost: u64, latency_ms: u64) -> Self {
        self.token_cost = token_cost;
        self.latency_ms = latency_ms;
        self
    }

    /// Attach the producing model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A cached analysis with TTL and access metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// Category the analysis belongs to
    pub category: AnalysisCategory,

    /// The cached analysis
    pub payload: AnalysisPayload,

    /// Identifiers whose change makes this entry stale
    pub tags: TagSet,

    /// Effective TTL resolved at insertion
    pub ttl: Duration,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Last read hit (for LRU tracking)
    pub last_accessed_at: DateTime<Utc>,

    /// Number of read hits
    pub access_count: u64,

    /// Insertion sequence, breaks LRU ties between identical timestamps
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl CacheEntry {
    /// Create a fresh entry stamped at `now`
    pub fn new(
        key: CacheKey,
        category: AnalysisCategory,
        payload: AnalysisPayload,
        tags: TagSet,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            category,
            payload,
            tags,
            ttl,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            seq: 0,
        }
    }

    /// Whether the entry's age has reached its TTL at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match ChronoDuration::from_std(self.ttl) {
            Ok(ttl) => now - self.created_at >= ttl,
            Err(_) => false,
        }
    }

    /// Instant the entry stops being served, if representable
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        ChronoDuration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
    }

    /// Age of the entry at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Time left before expiry, `None` once expired
    pub fn time_until_expiration(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_expired_at(now) {
            return None;
        }
        Some(self.ttl.saturating_sub(self.age_at(now)))
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }

    /// LRU ordering: oldest access first, then oldest creation, then insertion order
    pub(crate) fn lru_rank(&self) -> (DateTime<Utc>, DateTime<Utc>, u64) {
        (self.last_accessed_at, self.created_at, self.seq)
    }
}
