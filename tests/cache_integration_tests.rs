//! Integration tests for the cache module
//!
//! These tests verify the complete cache functionality including:
//! - Key derivation from request input
//! - TTL expiration and LRU eviction
//! - Invalidation by entity and cohort
//! - Statistics bookkeeping
//! - Concurrent access

use futures::future::join_all;
use insight_cache::cache::{
    AnalysisCache, AnalysisCategory, AnalysisPayload, CacheConfig, CacheKey, CacheLookupRequest,
    CacheWriteRequest, ChangeEvent, HealthStatus, InsightCache, ManualClock, TagSet,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn cache_with_clock(capacity: usize) -> (Arc<AnalysisCache>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let config = CacheConfig::builder()
        .capacity(capacity)
        .enable_auto_sweep(false)
        .build();
    let cache = AnalysisCache::with_clock(config, clock.clone()).unwrap();
    (Arc::new(cache), clock)
}

fn key_for(cache: &AnalysisCache, category: AnalysisCategory, input: &Value) -> CacheKey {
    cache.key_builder().derive_key(category, input, &Value::Null)
}

fn payload(text: &str) -> AnalysisPayload {
    AnalysisPayload::new(json!({ "summary": text })).with_cost(1_200, 3_500)
}

#[tokio::test]
async fn test_quick_insight_ttl_scenario() {
    let (cache, clock) = cache_with_clock(100);
    let input = json!({"student_id": "77", "gpa": 2.1});
    let key = key_for(&cache, AnalysisCategory::QuickInsight, &input);

    cache
        .put(
            key.clone(),
            AnalysisCategory::QuickInsight,
            payload("at risk"),
            TagSet::for_student("77"),
        )
        .await;

    clock.advance(Duration::from_secs(14 * 60));
    assert!(cache.get(&key).await.is_some());

    clock.advance(Duration::from_secs(2 * 60));
    assert!(cache.get(&key).await.is_none());
}

#[tokio::test]
async fn test_invalidated_entity_misses_until_reinserted() {
    let (cache, clock) = cache_with_clock(100);
    let input = json!({"student_id": "77", "gpa": 2.1});
    let key = key_for(&cache, AnalysisCategory::QuickInsight, &input);

    cache
        .put(
            key.clone(),
            AnalysisCategory::QuickInsight,
            payload("at risk"),
            TagSet::for_student("77"),
        )
        .await;

    clock.advance(Duration::from_secs(5 * 60));
    assert_eq!(cache.invalidate_entity("77").await, 1);

    // Same input derives the same key, but nothing has been written since
    assert_eq!(key_for(&cache, AnalysisCategory::QuickInsight, &input), key);
    assert!(cache.get(&key).await.is_none());

    cache
        .put(
            key.clone(),
            AnalysisCategory::QuickInsight,
            payload("recovering"),
            TagSet::for_student("77"),
        )
        .await;
    let hit = cache.get(&key).await.unwrap();
    assert_eq!(hit.payload.content, json!({"summary": "recovering"}));
}

#[tokio::test]
async fn test_capacity_two_lru_scenario() {
    let (cache, clock) = cache_with_clock(2);
    let [a, b, c] = ["a", "b", "c"].map(|name| {
        key_for(&cache, AnalysisCategory::QuickInsight, &json!({ "student_id": name }))
    });

    for k in [&a, &b] {
        cache
            .put(k.clone(), AnalysisCategory::QuickInsight, payload("x"), TagSet::new())
            .await;
        clock.advance(Duration::from_secs(1));
    }

    assert!(cache.get(&a).await.is_some());
    clock.advance(Duration::from_secs(1));

    cache
        .put(c.clone(), AnalysisCategory::QuickInsight, payload("x"), TagSet::new())
        .await;

    assert!(cache.get(&b).await.is_none());
    assert!(cache.get(&a).await.is_some());
    assert!(cache.get(&c).await.is_some());
    assert_eq!(cache.stats().await.counters.evictions, 1);
}

#[tokio::test]
async fn test_entity_invalidation_is_complete_and_precise() {
    let (cache, _) = cache_with_clock(100);

    // Three categories about student 77, one about student 78
    for category in [
        AnalysisCategory::QuickInsight,
        AnalysisCategory::StudentAnalysis,
        AnalysisCategory::InterventionPlan,
    ] {
        let key = key_for(&cache, category, &json!({"student_id": "77"}));
        cache
            .put(key, category, payload("77"), TagSet::for_student("77"))
            .await;
    }
    let other = key_for(&cache, AnalysisCategory::StudentAnalysis, &json!({"student_id": "78"}));
    cache
        .put(
            other.clone(),
            AnalysisCategory::StudentAnalysis,
            payload("78"),
            TagSet::for_student("78"),
        )
        .await;

    assert_eq!(cache.invalidate_entity("77").await, 3);
    assert_eq!(cache.len().await, 1);
    assert!(cache.get(&other).await.is_some());

    // Idempotent
    assert_eq!(cache.invalidate_entity("77").await, 0);
}

#[tokio::test]
async fn test_cohort_invalidation_scopes() {
    let (cache, _) = cache_with_clock(100);
    let category = AnalysisCategory::CohortPatterns;

    let whole = key_for(&cache, category, &json!({"cohort": "algebra-1"}));
    let period3 = key_for(&cache, category, &json!({"cohort": "algebra-1", "period": 3}));
    let period4 = key_for(&cache, category, &json!({"cohort": "algebra-1", "period": 4}));
    let biology = key_for(&cache, category, &json!({"cohort": "biology"}));

    cache
        .put(whole.clone(), category, payload("w"), TagSet::new().cohort("algebra-1"))
        .await;
    cache
        .put(
            period3.clone(),
            category,
            payload("p3"),
            TagSet::new().cohort_sub("algebra-1", "period-3"),
        )
        .await;
    cache
        .put(
            period4.clone(),
            category,
            payload("p4"),
            TagSet::new().cohort_sub("algebra-1", "period-4"),
        )
        .await;
    cache
        .put(biology.clone(), category, payload("b"), TagSet::new().cohort("biology"))
        .await;

    assert_eq!(cache.invalidate_cohort("algebra-1", Some("period-3")).await, 2);
    assert!(cache.contains_key(&period4).await);
    assert!(!cache.contains_key(&whole).await);
    assert!(!cache.contains_key(&period3).await);

    assert_eq!(cache.invalidate_cohort("algebra-1", None).await, 1);
    assert_eq!(cache.len().await, 1);
    assert!(cache.contains_key(&biology).await);
}

#[tokio::test]
async fn test_cohort_change_leaves_entity_entries() {
    let (cache, _) = cache_with_clock(100);

    let student = key_for(&cache, AnalysisCategory::StudentAnalysis, &json!({"student_id": "77"}));
    cache
        .put(
            student.clone(),
            AnalysisCategory::StudentAnalysis,
            payload("77"),
            TagSet::for_student("77"),
        )
        .await;

    let event = cache
        .handle_change(ChangeEvent::CohortChanged {
            scope_id: "algebra-1".to_string(),
            sub_scope: None,
        })
        .await;

    assert_eq!(event.count(), 0);
    assert!(cache.contains_key(&student).await);
}

#[tokio::test]
async fn test_category_flush() {
    let (cache, _) = cache_with_clock(100);

    for id in ["1", "2"] {
        let input = json!({ "student_id": id });
        for category in [AnalysisCategory::QuickInsight, AnalysisCategory::NarrativeReport] {
            cache
                .put(key_for(&cache, category, &input), category, payload(id), TagSet::for_student(id))
                .await;
        }
    }

    assert_eq!(cache.invalidate_category(AnalysisCategory::NarrativeReport).await, 2);
    let stats = cache.stats().await;
    assert_eq!(stats.entries_by_category[&AnalysisCategory::NarrativeReport], 0);
    assert_eq!(stats.entries_by_category[&AnalysisCategory::QuickInsight], 2);
    assert_eq!(stats.counters.invalidations, 2);
}

#[tokio::test]
async fn test_hit_rate_bookkeeping() {
    let (cache, _) = cache_with_clock(100);
    let key = key_for(&cache, AnalysisCategory::QuickInsight, &json!({"student_id": "77"}));

    assert!(cache.get(&key).await.is_none());
    cache
        .put(key.clone(), AnalysisCategory::QuickInsight, payload("x"), TagSet::new())
        .await;
    for _ in 0..3 {
        assert!(cache.get(&key).await.is_some());
    }

    let stats = cache.stats().await;
    assert_eq!(stats.counters.total_requests, 4);
    assert_eq!(stats.counters.hits, 3);
    assert_eq!(stats.counters.misses, 1);
    assert_eq!(stats.hit_rate, 0.75);
    assert_eq!(stats.counters.tokens_saved, 3_600);
}

#[tokio::test]
async fn test_concurrent_cache_access() {
    use tokio::task;

    let (cache, _) = cache_with_clock(1_000);

    let mut handles = vec![];
    for i in 0..10 {
        let cache = cache.clone();
        handles.push(task::spawn(async move {
            for j in 0..10 {
                let input = json!({ "student_id": format!("{}-{}", i, j) });
                let key = key_for(&cache, AnalysisCategory::QuickInsight, &input);
                cache
                    .put(
                        key.clone(),
                        AnalysisCategory::QuickInsight,
                        payload("x"),
                        TagSet::for_student(format!("{}-{}", i, j)),
                    )
                    .await;
                assert!(cache.get(&key).await.is_some());
            }
        }));
    }

    for result in join_all(handles).await {
        result.unwrap();
    }

    let stats = cache.stats().await;
    assert_eq!(stats.entries, 100);
    assert_eq!(stats.counters.hits, 100);
}

#[tokio::test]
async fn test_concurrent_reads_after_invalidation() {
    let (cache, _) = cache_with_clock(100);
    let key = key_for(&cache, AnalysisCategory::StudentAnalysis, &json!({"student_id": "77"}));

    cache
        .put(
            key.clone(),
            AnalysisCategory::StudentAnalysis,
            payload("stale"),
            TagSet::for_student("77"),
        )
        .await;
    assert_eq!(cache.invalidate_entity("77").await, 1);

    let reads = (0..20).map(|_| {
        let cache = cache.clone();
        let key = key.clone();
        async move { cache.get(&key).await.is_some() }
    });

    assert!(join_all(reads).await.into_iter().all(|hit| !hit));
}

#[tokio::test]
async fn test_capacity_never_exceeded_under_concurrency() {
    let (cache, _) = cache_with_clock(16);

    let writers = (0..64).map(|i| {
        let cache = cache.clone();
        tokio::spawn(async move {
            let key = CacheKey::from_raw(format!("quick_insight:{:016x}", i));
            cache
                .put(key, AnalysisCategory::QuickInsight, payload("x"), TagSet::new())
                .await
        })
    });

    for result in join_all(writers).await {
        assert!(result.unwrap().is_stored());
    }

    let stats = cache.stats().await;
    assert_eq!(stats.entries, 16);
    assert_eq!(stats.counters.evictions, 48);
}

#[tokio::test]
async fn test_facade_pipeline() {
    let clock = Arc::new(ManualClock::starting_now());
    let config = CacheConfig::builder().enable_auto_sweep(false).build();
    let cache = Arc::new(AnalysisCache::with_clock(config, clock.clone()).unwrap());
    let insights = InsightCache::from_cache(cache);

    let request = CacheLookupRequest::new(
        AnalysisCategory::InterventionPlan,
        json!({"student_id": "77", "risk_factors": ["attendance", "homework"]}),
    )
    .with_call_params(json!({"model": "reasoner-large"}));

    assert!(!insights.lookup(&request).await.hit);
    insights
        .store(CacheWriteRequest {
            lookup: request.clone(),
            payload: payload("tutoring twice a week"),
            tags: TagSet::for_student("77").cohort("algebra-1"),
        })
        .await;

    let reordered = CacheLookupRequest::new(
        AnalysisCategory::InterventionPlan,
        json!({"risk_factors": ["homework", "attendance"], "student_id": "77"}),
    )
    .with_call_params(json!({"model": "reasoner-large"}));
    assert!(insights.lookup(&reordered).await.hit);

    // intervention_plan expires after 30 minutes
    clock.advance(Duration::from_secs(30 * 60));
    assert!(!insights.lookup(&request).await.hit);

    let report = insights.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
}

#[test]
fn test_config_from_lookup() {
    let config = CacheConfig::from_lookup(|name| match name {
        "INSIGHT_CACHE_CAPACITY" => Some("64".to_string()),
        "INSIGHT_CACHE_TTL_COHORT_PATTERNS_MINUTES" => Some("240".to_string()),
        _ => None,
    })
    .unwrap();

    assert_eq!(config.capacity, 64);
    assert_eq!(
        config.policies.ttl(AnalysisCategory::CohortPatterns),
        Duration::from_secs(240 * 60)
    );
    assert!(AnalysisCache::new(config).is_ok());
}
