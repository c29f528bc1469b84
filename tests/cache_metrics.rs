use std::sync::{Arc, OnceLock};

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use moodfeed::cache::{
    CacheConfig, CacheKey, ClientCacheConfig, EventQueue, InvalidationConsumer,
    InvalidationError, InvalidationRouter, InvalidationTarget, KeyPattern, KeyedCache,
    MemoryStorage, MutationKind, PersistentClientCache, RequestDeduplicator,
};
use serial_test::serial;
use time::Duration;
use tokio::sync::Notify;

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

fn recorded() -> Vec<(String, DebugValue)> {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| (composite_key.key().name().to_string(), value))
        .collect()
}

fn counter_total(metrics: &[(String, DebugValue)], name: &str) -> u64 {
    metrics
        .iter()
        .filter(|(metric, _)| metric == name)
        .map(|(_, value)| match value {
            DebugValue::Counter(count) => *count,
            _ => 0,
        })
        .sum()
}

struct RejectingTarget;

impl InvalidationTarget for RejectingTarget {
    fn target_name(&self) -> &str {
        "rejecting"
    }

    fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, InvalidationError> {
        Err(InvalidationError::new("rejecting", pattern, "read only"))
    }
}

#[test]
#[serial]
fn server_cache_and_invalidation_emit_metrics() {
    let _ = snapshotter();

    let config = CacheConfig {
        max_entries: 1,
        ..CacheConfig::default()
    };
    let cache = Arc::new(KeyedCache::<String>::new("metrics_server", &config));
    cache.set_key(&CacheKey::Emotions, "calm".to_string());
    assert!(cache.get_key(&CacheKey::Emotions).is_some());
    assert!(cache.get_key(&CacheKey::PopularTags { limit: 5 }).is_none());
    cache.set_key(&CacheKey::PopularTags { limit: 5 }, "tags".to_string());

    let router = Arc::new(
        InvalidationRouter::new()
            .with_target(cache.clone())
            .with_target(Arc::new(RejectingTarget)),
    );
    let queue = Arc::new(EventQueue::with_limit(1));
    queue.publish(MutationKind::EmotionsUpdated);
    queue.publish(MutationKind::TagsUpdated);
    let consumer = InvalidationConsumer::new(config, router, queue.clone());
    assert!(consumer.consume());
    assert!(queue.is_empty());
    assert!(cache.is_empty());

    let metrics = recorded();
    let names: Vec<&str> = metrics.iter().map(|(name, _)| name.as_str()).collect();
    let expected = [
        "moodfeed_cache_hit_total",
        "moodfeed_cache_miss_total",
        "moodfeed_cache_evict_total",
        "moodfeed_cache_invalidated_total",
        "moodfeed_invalidation_failed_total",
        "moodfeed_cache_event_queue_len",
        "moodfeed_cache_event_dropped_total",
        "moodfeed_cache_consume_ms",
    ];
    for metric in expected {
        assert!(names.contains(&metric), "missing metric {metric}");
    }
    assert!(counter_total(&metrics, "moodfeed_cache_event_dropped_total") >= 1);
    assert!(counter_total(&metrics, "moodfeed_invalidation_failed_total") >= 1);
}

#[tokio::test]
#[serial]
async fn client_tier_emits_metrics() {
    let _ = snapshotter();

    let client = PersistentClientCache::new(
        Arc::new(MemoryStorage::new()),
        ClientCacheConfig::default(),
    );
    assert!(client.get::<u32>("cache_absent", Duration::minutes(1)).await.is_none());
    client.set("cache_present", &7_u32).await;
    assert_eq!(client.get::<u32>("cache_present", Duration::minutes(1)).await, Some(7));

    let dedupe: Arc<RequestDeduplicator<u32, String>> =
        Arc::new(RequestDeduplicator::new("metrics_dedupe"));
    let gate = Arc::new(Notify::new());
    let leader = {
        let dedupe = dedupe.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            dedupe
                .dedupe("shared", move || async move {
                    gate.notified().await;
                    Ok::<_, String>(1)
                })
                .await
        })
    };
    while dedupe.pending_count() == 0 {
        tokio::task::yield_now().await;
    }
    let follower = dedupe.dedupe("shared", || async { Ok::<_, String>(2) });
    gate.notify_one();
    let (led, followed) = tokio::join!(leader, follower);
    assert_eq!(led.expect("leader task").expect("leader result"), 1);
    assert_eq!(followed.expect("follower result"), 1);

    let metrics = recorded();
    for metric in [
        "moodfeed_client_cache_hit_total",
        "moodfeed_client_cache_miss_total",
        "moodfeed_dedupe_joined_total",
    ] {
        assert!(counter_total(&metrics, metric) >= 1, "missing metric {metric}");
    }
}
