use std::sync::Arc;
use std::time::Duration;

use strata_cache::{MemoryCache, MemoryCacheConfig};

#[test]
fn test_shared_handle_across_threads() {
    let cache: MemoryCache<u64> = MemoryCache::new(MemoryCacheConfig::default());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..100u64 {
                    cache.set(&format!("t{t}-k{i}"), Arc::new(i), 1);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(cache.total_count(), 400);
    assert_eq!(cache.total_cost(), 400);
    assert_eq!(cache.get("t2-k50").as_deref(), Some(&50));
}

#[test]
fn test_reads_protect_entries_from_trim() {
    let cache: MemoryCache<String> = MemoryCache::new(MemoryCacheConfig::default());
    for i in 0..8 {
        cache.set_value(&format!("k{i}"), format!("v{i}"));
    }

    // Re-read the two oldest entries so they outrank newer ones.
    cache.get("k0");
    cache.get("k1");
    cache.trim_to_count(3);

    assert!(cache.contains("k0"));
    assert!(cache.contains("k1"));
    assert!(cache.contains("k7"));
    assert!(!cache.contains("k2"));
    assert!(!cache.contains("k6"));
}

#[test]
fn test_contains_does_not_refresh_recency() {
    let cache: MemoryCache<String> = MemoryCache::new(MemoryCacheConfig::default());
    cache.set_value("old", "old".to_string());
    cache.set_value("new", "new".to_string());

    assert!(cache.contains("old"));
    cache.trim_to_count(1);

    // The probe above must not have saved "old" from eviction.
    assert!(!cache.contains("old"));
    assert!(cache.contains("new"));
}

#[test]
fn test_age_trim_is_recency_based() {
    let cache: MemoryCache<String> = MemoryCache::new(MemoryCacheConfig::default());
    cache.set_value("a", "a".to_string());
    std::thread::sleep(Duration::from_millis(60));

    // A read renews the entry's age even though it was inserted long ago.
    cache.get("a");
    cache.trim_to_age(Duration::from_millis(30));
    assert!(cache.contains("a"));

    std::thread::sleep(Duration::from_millis(60));
    cache.trim_to_age(Duration::from_millis(30));
    assert!(!cache.contains("a"));
}

#[tokio::test]
async fn test_auto_trim_task_stops_with_last_handle() {
    let cache: MemoryCache<String> = MemoryCache::new(MemoryCacheConfig {
        count_limit: Some(1),
        auto_trim_interval: Duration::from_millis(10),
        ..Default::default()
    });
    let handle = cache.spawn_auto_trim();

    drop(cache);
    // The loop notices the dropped cache on its next tick and exits on its
    // own, so awaiting the handle completes instead of hanging.
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("auto-trim task did not terminate")
        .unwrap();
}
