use std::time::Duration;

use strata_cache::{Cache, CacheConfig, CacheRegistry, MemoryCacheConfig};
use tempfile::tempdir;

fn open(root: &std::path::Path) -> Cache<Vec<u8>> {
    Cache::open(root, CacheConfig::default()).unwrap()
}

#[test]
fn test_round_trip_inline_and_file_backed() {
    let dir = tempdir().unwrap();
    let cache = open(&dir.path().join("media"));

    let small = vec![1u8; 128];
    let large = vec![2u8; 25 * 1024];
    assert!(cache.set("small", small.clone()));
    assert!(cache.set("large", large.clone()));

    assert_eq!(cache.get("small").as_deref(), Some(&small));
    assert_eq!(cache.get("large").as_deref(), Some(&large));
}

#[test]
fn test_persistence_across_restart() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("media");

    {
        let cache = open(&root);
        assert!(cache.set("k", vec![42u8; 64]));
    }

    // A fresh process would start with a cold memory tier; the value comes
    // back from disk and is promoted on first read.
    let cache = open(&root);
    assert!(!cache.memory().contains("k"));
    assert_eq!(cache.get("k").as_deref(), Some(&vec![42u8; 64]));
    assert!(cache.memory().contains("k"));
}

#[test]
fn test_memory_trim_then_heal_from_disk() {
    let dir = tempdir().unwrap();
    let cache: Cache<Vec<u8>> = Cache::open(
        dir.path().join("media"),
        CacheConfig {
            memory: MemoryCacheConfig {
                count_limit: Some(2),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();

    for i in 0..6 {
        cache.set(&format!("k{i}"), vec![i as u8; 32]);
    }
    cache.memory().trim_to_count(2);

    // Every key is still readable; evicted ones re-enter through promotion.
    for i in 0..6 {
        assert_eq!(cache.get(&format!("k{i}")).as_deref(), Some(&vec![i as u8; 32]));
    }
}

#[test]
fn test_remove_all_cascades_and_store_stays_usable() {
    let dir = tempdir().unwrap();
    let cache = open(&dir.path().join("media"));

    cache.set("a", vec![1u8]);
    cache.set("b", vec![2u8; 25 * 1024]);
    cache.remove_all();

    assert!(!cache.contains("a"));
    assert!(!cache.contains("b"));
    assert_eq!(cache.memory().total_count(), 0);
    assert_eq!(cache.disk().total_count(), 0);

    assert!(cache.set("c", vec![3u8]));
    assert_eq!(cache.get("c").as_deref(), Some(&vec![3u8]));
}

#[test]
fn test_empty_key_is_rejected_everywhere() {
    let dir = tempdir().unwrap();
    let cache = open(&dir.path().join("media"));

    assert!(!cache.set("", vec![1u8]));
    assert_eq!(cache.get(""), None);
    assert!(!cache.contains(""));
    cache.remove("");
    assert_eq!(cache.disk().total_count(), 0);
}

#[test]
fn test_registry_isolates_named_caches() {
    let dir = tempdir().unwrap();
    let registry: CacheRegistry<Vec<u8>> = CacheRegistry::new(dir.path(), CacheConfig::default());

    let images = registry.get_or_create("images").unwrap();
    let thumbs = registry.get_or_create("thumbs").unwrap();

    images.set("k", vec![1u8]);
    assert!(images.contains("k"));
    assert!(!thumbs.contains("k"));
    assert!(dir.path().join("images/manifest.sqlite").is_file());
    assert!(dir.path().join("thumbs/manifest.sqlite").is_file());
}

#[tokio::test]
async fn test_facade_auto_trim_enforces_disk_count() {
    let dir = tempdir().unwrap();
    let cache: Cache<Vec<u8>> = Cache::open(
        dir.path().join("media"),
        CacheConfig {
            memory: MemoryCacheConfig {
                count_limit: Some(3),
                auto_trim_interval: Duration::from_millis(20),
                ..Default::default()
            },
            disk: strata_cache::DiskCacheConfig {
                count_limit: Some(3),
                auto_trim_interval: Duration::from_millis(20),
                ..Default::default()
            },
        },
    )
    .unwrap();
    cache.start_auto_trim();

    for i in 0..10 {
        cache.set(&format!("k{i}"), vec![i as u8]);
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(cache.memory().total_count() <= 3);
    assert!(cache.disk().total_count() <= 3);
}

#[tokio::test]
async fn test_set_background_lands_on_disk() {
    let dir = tempdir().unwrap();
    let cache = open(&dir.path().join("media"));

    cache.set_background("k", vec![5u8; 16]);
    // Visible in memory immediately.
    assert!(cache.memory().contains("k"));

    // The disk write is fire-and-forget; poll until it lands.
    for _ in 0..50 {
        if cache.disk().contains("k") {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("background write never reached disk");
}
