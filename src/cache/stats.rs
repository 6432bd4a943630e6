//! Hit/miss bookkeeping and the serializable statistics snapshot

use crate::cache::category::AnalysisCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Monotonic counters, updated under the store lock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsCollector {
    /// Reads that consulted the cache (hits + misses)
    pub total_requests: u64,

    /// Reads served from the cache
    pub hits: u64,

    /// Reads that found nothing usable
    pub misses: u64,

    /// Entries evicted under capacity pressure
    pub evictions: u64,

    /// Entries removed by invalidation, manual removal or clear
    pub invalidations: u64,

    /// Entries dropped because they reached their TTL
    pub expirations: u64,

    /// Successful writes
    pub inserts: u64,

    /// Reads skipped because the caller bypassed the cache
    pub bypassed: u64,

    /// Writes skipped (caller opt-out or TTL of zero)
    pub skipped_writes: u64,

    /// Writes dropped because a tag was invalidated while the payload was produced
    pub stale_writes: u64,

    /// Writes lacking a tag of their category's invalidation scope
    pub under_tagged_writes: u64,

    /// Reasoning tokens not spent thanks to hits
    pub tokens_saved: u64,
}

impl StatsCollector {
    /// Record a cache hit that avoided `token_cost` tokens
    pub fn record_hit(&mut self, token_cost: u64) {
        self.total_requests += 1;
        self.hits += 1;
        self.tokens_saved = self.tokens_saved.saturating_add(token_cost);
    }

    /// Record a cache miss
    pub fn record_miss(&mut self) {
        self.total_requests += 1;
        self.misses += 1;
    }

    /// Record an eviction
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    /// Record entries removed by invalidation
    pub fn record_invalidations(&mut self, count: usize) {
        self.invalidations += count as u64;
    }

    /// Record entries dropped on expiry
    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    /// Record an insert
    pub fn record_insert(&mut self) {
        self.inserts += 1;
    }

    /// Record a bypassed read
    pub fn record_bypass(&mut self) {
        self.bypassed += 1;
    }

    /// Record a skipped write
    pub fn record_skipped_write(&mut self) {
        self.skipped_writes += 1;
    }

    /// Record a write refused as stale
    pub fn record_stale_write(&mut self) {
        self.stale_writes += 1;
    }

    /// Record a write missing its scope tag
    pub fn record_under_tagged_write(&mut self) {
        self.under_tagged_writes += 1;
    }

    /// `hits / total_requests`, or 0 with no requests
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

/// Point-in-time statistics for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Counters since construction (or the last reset)
    #[serde(flatten)]
    pub counters: StatsCollector,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Configured capacity
    pub capacity: usize,

    /// `entries / capacity`
    pub utilization: f64,

    /// `hits / total_requests`
    pub hit_rate: f64,

    /// Live entry count per category
    pub entries_by_category: BTreeMap<AnalysisCategory, usize>,
}

impl CacheStats {
    /// Build a snapshot from counters and current occupancy
    pub fn new(
        counters: StatsCollector,
        capacity: usize,
        entries_by_category: BTreeMap<AnalysisCategory, usize>,
    ) -> Self {
        let entries = entries_by_category.values().sum();
        let utilization = if capacity == 0 {
            0.0
        } else {
            entries as f64 / capacity as f64
        };
        let hit_rate = counters.hit_rate();

        Self {
            counters,
            entries,
            capacity,
            utilization,
            hit_rate,
            entries_by_category,
        }
    }

    /// Miss rate, 0 with no requests
    pub fn miss_rate(&self) -> f64 {
        if self.counters.total_requests == 0 {
            0.0
        } else {
            1.0 - self.hit_rate
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ requests: {}, hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}/{}, evictions: {}, invalidations: {}, expirations: {} }}",
            self.counters.total_requests,
            self.counters.hits,
            self.counters.misses,
            self.hit_rate * 100.0,
            self.entries,
            self.capacity,
            self.counters.evictions,
            self.counters.invalidations,
            self.counters.expirations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = StatsCollector::default();
        for _ in 0..3 {
            stats.record_hit(100);
        }
        stats.record_miss();

        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.tokens_saved, 300);
    }

    #[test]
    fn test_hit_rate_zero_requests() {
        let stats = StatsCollector::default();
        assert_eq!(stats.hit_rate(), 0.0);

        let snapshot = CacheStats::new(stats, 10, BTreeMap::new());
        assert_eq!(snapshot.hit_rate, 0.0);
        assert_eq!(snapshot.miss_rate(), 0.0);
    }

    #[test]
    fn test_bypass_not_counted_as_request() {
        let mut stats = StatsCollector::default();
        stats.record_bypass();
        stats.record_skipped_write();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.bypassed, 1);
        assert_eq!(stats.skipped_writes, 1);
    }

    #[test]
    fn test_snapshot_utilization() {
        let mut by_category = BTreeMap::new();
        by_category.insert(AnalysisCategory::QuickInsight, 3);
        by_category.insert(AnalysisCategory::CohortPatterns, 1);

        let snapshot = CacheStats::new(StatsCollector::default(), 8, by_category);
        assert_eq!(snapshot.entries, 4);
        assert_eq!(snapshot.utilization, 0.5);
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let mut counters = StatsCollector::default();
        counters.record_hit(5);
        let snapshot = CacheStats::new(counters, 10, BTreeMap::new());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["total_requests"], 1);
        assert_eq!(json["capacity"], 10);
    }

    #[test]
    fn test_stats_display() {
        let mut counters = StatsCollector::default();
        counters.record_hit(0);
        counters.record_miss();
        let snapshot = CacheStats::new(counters, 10, BTreeMap::new());

        let display = format!("{}", snapshot);
        assert!(display.contains("hits: 1"));
        assert!(display.contains("misses: 1"));
        assert!(display.contains("hit_rate: 50.00%"));
    }
}
