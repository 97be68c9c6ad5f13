use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use polwatch_cache::{InMemoryCache, ResultCache, SharedCache};
use polwatch_core::{Report, ReportResult};
use polwatch_persist::{KvStore, RedisKv, SqliteKv};

fn report(id: &str, ids: &[&str]) -> Report {
    let mut r = Report::new(id, "default");
    r.id = id.to_string();
    r.results = ids.iter().map(|i| ReportResult { id: i.to_string(), ..Default::default() }).collect();
    r
}

fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}

fn sqlite() -> (tempfile::TempDir, Arc<SqliteKv>) {
    let dir = tempfile::tempdir().unwrap();
    let kv = SqliteKv::open(dir.path().join("cache.db").to_str().unwrap()).unwrap();
    (dir, Arc::new(kv))
}

#[test]
fn both_backends_are_idempotent() {
    let (_dir, kv) = sqlite();
    let caches: Vec<Box<dyn ResultCache>> = vec![
        Box::new(InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(60))),
        Box::new(SharedCache::new(kv, "polwatch", Duration::from_secs(60), Duration::from_secs(60))),
    ];
    for cache in caches {
        let r = report("r1", &["a", "b"]);
        cache.add_report(&r);
        let first = sorted(cache.get_results("r1"));
        cache.add_report(&r);
        assert_eq!(sorted(cache.get_results("r1")), first);
        assert_eq!(first, vec!["a", "b"]);
        assert!(cache.get_results("unknown").is_empty());
    }
}

#[test]
fn shared_flag() {
    let (_dir, kv) = sqlite();
    assert!(SharedCache::new(kv, "p", Duration::from_secs(1), Duration::from_secs(1)).shared());
    assert!(!InMemoryCache::new(Duration::from_secs(1), Duration::from_secs(1)).shared());
}

#[test]
fn shared_cache_keeps_vanished_ids_until_keep() {
    let (_dir, kv) = sqlite();
    let cache = SharedCache::new(kv, "polwatch", Duration::from_millis(50), Duration::from_secs(60));
    cache.add_report(&report("r1", &["a", "b"]));
    cache.add_report(&report("r1", &["a"]));
    assert_eq!(sorted(cache.get_results("r1")), vec!["a", "b"]);
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(cache.get_results("r1"), vec!["a"]);
}

#[test]
fn shared_cache_removal_and_clear() {
    let (_dir, kv) = sqlite();
    let cache = SharedCache::new(kv.clone(), "polwatch", Duration::from_secs(60), Duration::from_millis(50));
    cache.add_report(&report("r1", &["a"]));
    cache.add_report(&report("r2", &["x"]));
    cache.remove_report("r1");
    assert_eq!(cache.get_results("r1"), vec!["a"]);
    std::thread::sleep(Duration::from_millis(120));
    assert!(cache.get_results("r1").is_empty());
    assert_eq!(cache.get_results("r2"), vec!["x"]);

    kv.set("unrelated", "1", None).unwrap();
    cache.clear();
    assert!(cache.get_results("r2").is_empty());
    assert_eq!(kv.get("unrelated").unwrap().as_deref(), Some("1"));
}

#[test]
fn replicas_see_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let a = SharedCache::new(
        Arc::new(SqliteKv::open(path.to_str().unwrap()).unwrap()),
        "polwatch",
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    let b = SharedCache::new(
        Arc::new(SqliteKv::open(path.to_str().unwrap()).unwrap()),
        "polwatch",
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    a.add_report(&report("r1", &["a"]));
    assert_eq!(b.get_results("r1"), vec!["a"]);
}

struct Broken;

impl KvStore for Broken {
    fn set(&self, _: &str, _: &str, _: Option<Duration>) -> anyhow::Result<()> {
        Err(anyhow!("connection refused"))
    }
    fn get(&self, _: &str) -> anyhow::Result<Option<String>> {
        Err(anyhow!("connection refused"))
    }
    fn keys(&self, _: &str) -> anyhow::Result<Vec<String>> {
        Err(anyhow!("connection refused"))
    }
    fn expire(&self, _: &str, _: Duration) -> anyhow::Result<bool> {
        Err(anyhow!("connection refused"))
    }
    fn del(&self, _: &[String]) -> anyhow::Result<usize> {
        Err(anyhow!("connection refused"))
    }
}

#[test]
fn backend_errors_fall_back_to_safe_defaults() {
    let cache = SharedCache::new(Arc::new(Broken), "polwatch", Duration::from_secs(1), Duration::from_secs(1));
    cache.add_report(&report("r1", &["a"]));
    cache.remove_report("r1");
    cache.clear();
    assert!(cache.get_results("r1").is_empty());
}

#[test]
fn unreachable_redis_behaves_like_a_broken_backend() {
    let kv = RedisKv::open("redis://127.0.0.1:1/").unwrap();
    let cache = SharedCache::new(Arc::new(kv), "polwatch", Duration::from_secs(1), Duration::from_secs(1));
    assert!(cache.shared());
    cache.add_report(&report("r1", &["a"]));
    assert!(cache.get_results("r1").is_empty());
}

// Needs a running Redis at REDIS_URL (default redis://127.0.0.1/).
#[test]
#[ignore]
fn redis_replicas_see_each_other() {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let prefix = format!("polwatch-test-{}", std::process::id());
    let a = SharedCache::new(Arc::new(RedisKv::open(&url).unwrap()), prefix.clone(), Duration::from_millis(50), Duration::from_secs(60));
    let b = SharedCache::new(Arc::new(RedisKv::open(&url).unwrap()), prefix, Duration::from_millis(50), Duration::from_secs(60));

    a.add_report(&report("r1", &["a", "b"]));
    assert_eq!(sorted(b.get_results("r1")), vec!["a", "b"]);

    b.add_report(&report("r1", &["a"]));
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(a.get_results("r1"), vec!["a"]);

    a.clear();
    assert!(b.get_results("r1").is_empty());
}
