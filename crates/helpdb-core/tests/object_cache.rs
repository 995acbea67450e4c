#![allow(clippy::unwrap_used, clippy::panic)]

use helpdb_core::{CacheConfig, CacheLookup, CacheMode, CacheStatus, ObjectCache};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn open(dir: &Path, capacity: usize, mode: CacheMode) -> ObjectCache {
    ObjectCache::open(&CacheConfig {
        enabled: true,
        dir: dir.to_path_buf(),
        capacity,
        mode,
    })
    .unwrap()
}

fn fill(cache: &mut ObjectCache, url: &str, status: CacheStatus) {
    let handle = cache.add(url).unwrap();
    fs::write(handle.path(), url.as_bytes()).unwrap();
    cache.set_complete(&handle, status).unwrap();
}

fn mapping(cache: &mut ObjectCache) -> BTreeMap<String, CacheStatus> {
    cache
        .entries()
        .into_iter()
        .map(|e| (e.url, e.status))
        .collect()
}

#[test]
fn test_reload_reproduces_mapping() {
    let dir = TempDir::new().unwrap();
    let mut cache = open(dir.path(), 4, CacheMode::Local);
    fill(&mut cache, "http://h/a.gif", CacheStatus::Ok);
    fill(&mut cache, "http://h/b.gif", CacheStatus::Failed);
    let pending = cache.add("http://h/c.gif").unwrap();
    fs::write(pending.path(), b"partial").unwrap();
    let before = mapping(&mut cache);
    drop(cache);

    let mut reloaded = open(dir.path(), 4, CacheMode::Local);
    assert_eq!(mapping(&mut reloaded), before);
    assert_eq!(before["http://h/c.gif"], CacheStatus::Incomplete);
    assert!(matches!(reloaded.get("http://h/a.gif"), CacheLookup::Hit(_)));
    assert_eq!(reloaded.get("http://h/b.gif"), CacheLookup::Failed);
    assert_eq!(reloaded.get("http://h/c.gif"), CacheLookup::Miss);
}

#[test]
fn test_overflow_evicts_only_first_url() {
    let dir = TempDir::new().unwrap();
    let capacity = 3;
    let mut cache = open(dir.path(), capacity, CacheMode::Local);
    let urls: Vec<String> = (0..=capacity).map(|i| format!("http://h/{i}.png")).collect();

    let mut paths = Vec::new();
    for url in &urls[..capacity] {
        fill(&mut cache, url, CacheStatus::Ok);
        if let CacheLookup::Hit(path) = cache.get(url) {
            paths.push(path);
        }
    }
    assert_eq!(paths.len(), capacity);

    fill(&mut cache, &urls[capacity], CacheStatus::Ok);

    assert_eq!(cache.get(&urls[0]), CacheLookup::Miss);
    for url in &urls[1..] {
        assert!(matches!(cache.get(url), CacheLookup::Hit(_)), "{url} missing");
    }
    // The first slot was reused, so its file now holds the newest content.
    assert_eq!(fs::read(&paths[0]).unwrap(), urls[capacity].as_bytes());
    for (path, url) in paths.iter().zip(&urls).skip(1) {
        assert_eq!(fs::read(path).unwrap(), url.as_bytes());
    }
}

#[test]
fn test_capacity_two() {
    let dir = TempDir::new().unwrap();
    let mut cache = open(dir.path(), 2, CacheMode::Local);
    for url in ["u1", "u2", "u3"] {
        fill(&mut cache, url, CacheStatus::Ok);
    }
    assert_eq!(cache.get("u1"), CacheLookup::Miss);
    assert!(matches!(cache.get("u2"), CacheLookup::Hit(_)));
    assert!(matches!(cache.get("u3"), CacheLookup::Hit(_)));
}

#[test]
fn test_external_mode_sees_peer_writes() {
    let dir = TempDir::new().unwrap();
    let mut first = open(dir.path(), 4, CacheMode::External);
    let mut second = open(dir.path(), 4, CacheMode::External);

    fill(&mut first, "http://h/shared.gif", CacheStatus::Ok);
    assert!(matches!(second.get("http://h/shared.gif"), CacheLookup::Hit(_)));

    assert!(second.remove("http://h/shared.gif").unwrap());
    assert_eq!(first.get("http://h/shared.gif"), CacheLookup::Miss);
}

#[test]
fn test_local_completion_after_peer_reused_slot() {
    let dir = TempDir::new().unwrap();
    let mut local = open(dir.path(), 1, CacheMode::Local);
    let mut peer = open(dir.path(), 1, CacheMode::External);

    let handle = local.add("http://h/a.gif").unwrap();
    fill(&mut peer, "http://h/b.gif", CacheStatus::Ok);

    assert!(local.set_complete(&handle, CacheStatus::Ok).is_err());
    assert_eq!(local.get("http://h/a.gif"), CacheLookup::Miss);
    match local.get("http://h/b.gif") {
        CacheLookup::Hit(path) => assert_eq!(fs::read(path).unwrap(), b"http://h/b.gif"),
        other => panic!("expected hit, got {other:?}"),
    }
    assert_eq!(mapping(&mut local), mapping(&mut peer));
}

#[test]
fn test_retry_failures_unsticks_entries() {
    let dir = TempDir::new().unwrap();
    let mut cache = open(dir.path(), 4, CacheMode::Local);
    fill(&mut cache, "bad", CacheStatus::Failed);
    fill(&mut cache, "good", CacheStatus::Ok);

    assert_eq!(cache.retry_failures().unwrap(), 1);
    assert_eq!(cache.get("bad"), CacheLookup::Miss);
    assert!(matches!(cache.get("good"), CacheLookup::Hit(_)));
}

#[test]
fn test_damaged_directory_file_degrades_to_empty() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("directory"), "garbage\n\0\0\0").unwrap();
    let mut cache = open(dir.path(), 4, CacheMode::Local);
    assert!(cache.entries().is_empty());
    fill(&mut cache, "fresh", CacheStatus::Ok);
    assert!(matches!(cache.get("fresh"), CacheLookup::Hit(_)));
}
