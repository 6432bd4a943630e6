//! Insight Cache Demo Application
//!
//! Simulates an analysis pipeline in front of a slow reasoning service:
//! repeated requests are served from cache, a grade change invalidates the
//! affected student, and a health report is printed at the end.
//!
//! Usage:
//!   cargo run --example insight_cache_demo
//!
//! Environment variables (all optional, see `CacheConfig::from_env`):
//!   INSIGHT_CACHE_CAPACITY                  - maximum entries (default: 1000)
//!   INSIGHT_CACHE_TTL_QUICK_INSIGHT_MINUTES - quick insight TTL (default: 15)
//!   RUST_LOG                                - log filter (default: info)

use insight_cache::cache::{
    AnalysisCategory, AnalysisPayload, CacheConfig, CacheLookupRequest, ChangeEvent, InsightCache,
    LookupParams, TagSet,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stand-in for the reasoning service
async fn reason(category: AnalysisCategory, student_id: &str) -> anyhow::Result<AnalysisPayload> {
    let started = Instant::now();
    tokio::time::sleep(Duration::from_millis(250)).await;

    Ok(AnalysisPayload::new(json!({
        "student_id": student_id,
        "category": category.as_str(),
        "summary": format!("{} for student {}", category, student_id),
    }))
    .with_cost(1_500, started.elapsed().as_millis() as u64)
    .with_model("reasoner-large"))
}

fn request(category: AnalysisCategory, student_id: &str, scores: &[u32]) -> CacheLookupRequest {
    CacheLookupRequest::new(
        category,
        json!({
            "student_id": student_id,
            "recent_scores": scores,
            "requested_at": chrono::Utc::now().to_rfc3339(),
        }),
    )
    .with_call_params(json!({"model": "reasoner-large", "temperature": 0.2}))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Insight Cache Demo ===");

    let config = CacheConfig::from_env()?;
    info!(
        "Capacity: {}, quick insight TTL: {:?}",
        config.capacity,
        config.policies.ttl(AnalysisCategory::QuickInsight)
    );

    let cache = InsightCache::new(config)?;
    let sweeper = cache.cache().start_auto_sweep();

    let students: [(&str, Vec<u32>); 2] = [("77", vec![71, 64, 58]), ("78", vec![88, 91, 85])];

    info!("\n--- First pass (cold cache) ---");
    for round in 0..2 {
        for (student_id, scores) in &students {
            for category in [AnalysisCategory::QuickInsight, AnalysisCategory::StudentAnalysis] {
                let started = Instant::now();
                let result = cache
                    .get_or_compute(
                        &request(category, student_id, scores),
                        TagSet::for_student(*student_id).cohort("algebra-1"),
                        || reason(category, student_id),
                    )
                    .await?;
                info!(
                    "round {} {} {}: {} in {:?}",
                    round,
                    category,
                    student_id,
                    if result.hit { "HIT" } else { "MISS" },
                    started.elapsed()
                );
            }
        }
        if round == 0 {
            info!("\n--- Second pass (warm cache) ---");
        }
    }

    info!("\n--- Grade change for student 77 ---");
    let event = cache
        .handle_change(ChangeEvent::EntityChanged {
            entity_id: "77".to_string(),
        })
        .await;
    info!("{} ({} entries removed)", event.reason, event.count());

    let result = cache
        .get_or_compute(
            &request(AnalysisCategory::QuickInsight, "77", &[71, 64, 58, 92]),
            TagSet::for_student("77"),
            || reason(AnalysisCategory::QuickInsight, "77"),
        )
        .await?;
    info!("student 77 after change: hit = {}", result.hit);

    info!("\n--- Forced refresh ---");
    let refresh = request(AnalysisCategory::StudentAnalysis, "78", &[88, 91, 85])
        .with_params(LookupParams::refresh());
    let result = cache
        .get_or_compute(&refresh, TagSet::for_student("78"), || {
            reason(AnalysisCategory::StudentAnalysis, "78")
        })
        .await?;
    info!("student 78 refreshed: hit = {}", result.hit);

    info!("\n--- Statistics ---");
    let stats = cache.stats().await;
    info!("{}", stats);
    info!("Tokens saved: {}", stats.counters.tokens_saved);

    info!("\n--- Health ---");
    let report = cache.health_check().await;
    info!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(handle) = sweeper {
        handle.abort();
    }

    info!("\n=== Demo Complete ===");
    Ok(())
}
