//! # Insight Cache
//!
//! Result cache for a generative-AI analysis pipeline in an educational
//! analytics product. Each request (a student analysis, an intervention
//! plan, a cohort pattern report) costs a slow, metered reasoning call; this
//! crate serves repeated requests over unchanged data from memory.
//!
//! ## Features
//!
//! - Deterministic keys from a canonical form of the request input
//! - Per-category TTL with per-call overrides and opt-outs
//! - Capacity bound with LRU eviction
//! - Invalidation by student or cohort when the underlying data changes
//! - Statistics, token savings and a health classification
//! - Async-first design using tokio
//!
//! ## Usage
//!
//! ```
//! use insight_cache::{AnalysisCache, AnalysisCategory, AnalysisPayload, CacheConfig, TagSet};
//! use serde_json::json;
//!
//! tokio_test::block_on(async {
//!     let cache = AnalysisCache::new(CacheConfig::default()).unwrap();
//!     let key = cache.key_builder().derive_key(
//!         AnalysisCategory::StudentAnalysis,
//!         &json!({"student_id": "77"}),
//!         &json!({"model": "reasoner-large"}),
//!     );
//!
//!     cache
//!         .put(
//!             key.clone(),
//!             AnalysisCategory::StudentAnalysis,
//!             AnalysisPayload::new(json!("steady progress")),
//!             TagSet::for_student("77"),
//!         )
//!         .await;
//!     assert!(cache.get(&key).await.is_some());
//!
//!     // Student data changed: every analysis about them is stale
//!     assert_eq!(cache.invalidate_entity("77").await, 1);
//!     assert!(cache.get(&key).await.is_none());
//! });
//! ```
//!
//! ## Configuration
//!
//! [`CacheConfig::from_env`] reads `INSIGHT_CACHE_*` variables (and a `.env`
//! file when present). See [`cache::config`] for the full list.

pub mod cache;
pub mod error;

pub use cache::{
    AnalysisCache, AnalysisCategory, AnalysisPayload, CacheConfig, CacheKey, CacheLookupRequest,
    CacheLookupResult, CacheStats, CacheWriteRequest, ChangeEvent, HealthReport, HealthStatus,
    InsightCache, InvalidationTag, LookupParams, TagSet,
};
pub use error::{CacheError, Result};
