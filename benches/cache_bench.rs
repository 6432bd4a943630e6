use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use insight_cache::cache::{
    AnalysisCache, AnalysisCategory, AnalysisPayload, CacheConfig, CacheKey, CacheKeyBuilder,
    TagSet,
};
use serde_json::json;
use tokio::runtime::Runtime;

fn student_input(id: usize) -> serde_json::Value {
    json!({
        "student_id": id.to_string(),
        "display_name": "Student",
        "recent_scores": [71, 64, 58, 80, 77],
        "attendance": {"present": 41, "absent": 3, "tardy": 2},
        "flags": ["homework", "attendance"],
    })
}

fn bench_derive_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive_key");
    group.throughput(Throughput::Elements(1));

    let builder = CacheKeyBuilder::default();
    let input = student_input(77);
    let params = json!({"model": "reasoner-large", "temperature": 0.2});

    group.bench_function("student_analysis", |b| {
        b.iter(|| {
            black_box(builder.derive_key(
                AnalysisCategory::StudentAnalysis,
                black_box(&input),
                black_box(&params),
            ))
        });
    });

    group.finish();
}

fn populated_cache(rt: &Runtime, capacity: usize, count: usize) -> (AnalysisCache, Vec<CacheKey>) {
    let config = CacheConfig::builder()
        .capacity(capacity)
        .enable_auto_sweep(false)
        .build();
    let cache = AnalysisCache::new(config).unwrap();
    let builder = cache.key_builder();

    let keys: Vec<CacheKey> = (0..count)
        .map(|id| builder.derive_key(AnalysisCategory::QuickInsight, &student_input(id), &()))
        .collect();

    rt.block_on(async {
        for (id, key) in keys.iter().enumerate() {
            cache
                .put(
                    key.clone(),
                    AnalysisCategory::QuickInsight,
                    AnalysisPayload::new(json!("summary")).with_cost(800, 1_500),
                    TagSet::for_student(id.to_string()),
                )
                .await;
        }
    });

    (cache, keys)
}

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    let rt = Runtime::new().unwrap();
    let (cache, keys) = populated_cache(&rt, 1_000, 100);

    let cache = &cache;
    let keys = &keys;
    group.bench_function("get_hit", |b| {
        let mut counter = 0;
        b.to_async(&rt).iter(move || {
            let key = &keys[counter % keys.len()];
            counter += 1;
            async move { black_box(cache.get(key).await) }
        });
    });

    group.finish();
}

fn bench_put_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    let rt = Runtime::new().unwrap();
    let (cache, _) = populated_cache(&rt, 100, 100);

    let cache = &cache;
    group.bench_function("put_evicting", |b| {
        let mut counter = 0u64;
        b.to_async(&rt).iter(move || {
            counter += 1;
            let key = CacheKey::from_raw(format!("quick_insight:{:016x}", counter));
            async move {
                black_box(
                    cache
                        .put(
                            key,
                            AnalysisCategory::QuickInsight,
                            AnalysisPayload::new(json!("summary")),
                            TagSet::new(),
                        )
                        .await,
                )
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_derive_key, bench_cached_get, bench_put_with_eviction);
criterion_main!(benches);
