//! # Analysis Caching Layer
//!
//! Caches the results of expensive reasoning calls (student analyses,
//! intervention plans, cohort pattern reports) so repeated requests over
//! unchanged data are served without another call.
//!
//! ## Features
//!
//! - **Canonical Keys**: SHA-256 over a canonical form of the request, so field
//!   order, list order and cosmetic fields do not split the cache
//! - **Per-Category TTL**: volatile analyses expire sooner than cohort reports
//! - **LRU Eviction**: bounded capacity, least recently used entry goes first
//! - **Targeted Invalidation**: entries are tagged with the students and
//!   cohorts they depend on and dropped when those change
//! - **Observability**: hit/miss counters, token savings and a health check
//!
//! ## Example
//!
//! ```rust
//! use insight_cache::cache::{AnalysisCategory, AnalysisPayload, CacheConfig, InsightCache,
//!     CacheLookupRequest, TagSet};
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = InsightCache::new(CacheConfig::default())?;
//!
//! let request = CacheLookupRequest::new(
//!     AnalysisCategory::QuickInsight,
//!     json!({"student_id": "77", "recent_scores": [71, 64, 58]}),
//! );
//!
//! let result = cache
//!     .get_or_compute(&request, TagSet::for_student("77"), || async {
//!         // call the reasoning service here
//!         Ok::<_, anyhow::Error>(AnalysisPayload::new(json!("declining trend")))
//!     })
//!     .await?;
//!
//! println!("hit: {}", result.hit);
//! # Ok(())
//! # }
//! ```

mod canonical;
pub mod category;
pub mod clock;
pub mod config;
pub mod entry;
pub mod health;
pub mod integration;
pub mod invalidation;
pub mod key;
pub mod policy;
pub mod stats;
pub mod store;

pub use category::{AnalysisCategory, ScopeKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{AnalysisPayload, CacheEntry};
pub use health::{
    spawn_sweeper, HealthReport, HealthStatus, HealthThresholds, MIN_SWEEP_INTERVAL,
};
pub use integration::{
    CacheLookupRequest, CacheLookupResult, CacheWriteRequest, HitMetadata, InsightCache,
};
pub use invalidation::{
    ChangeEvent, InvalidationEvent, InvalidationReason, InvalidationTag, TagSet,
};
pub use key::{CacheKey, CacheKeyBuilder, CanonicalValue, Scalar};
pub use policy::{CategoryPolicy, LookupParams, PolicyRegistry};
pub use stats::{CacheStats, StatsCollector};
pub use store::{AnalysisCache, CacheHit, PutOutcome};
