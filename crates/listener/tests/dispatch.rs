use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use polwatch_cache::{InMemoryCache, ResultCache};
use polwatch_core::prelude::*;
use polwatch_listener::{ResultConsumer, ResultListener, ScopeConsumer, SyncConsumer};
use polwatch_recondition::Reconditioner;

#[derive(Default)]
struct RecordingConsumer {
    seen: Mutex<Vec<(String, bool)>>,
}

impl RecordingConsumer {
    fn policies(&self) -> Vec<String> {
        let mut v: Vec<String> = self.seen.lock().iter().map(|(p, _)| p.clone()).collect();
        v.sort();
        v
    }
}

#[async_trait::async_trait]
impl ResultConsumer for RecordingConsumer {
    async fn on_result(&self, _report: &Report, result: &ReportResult, pre_existed: bool) {
        self.seen.lock().push((result.policy.clone(), pre_existed));
    }
}

#[derive(Default)]
struct RecordingScope {
    batches: Mutex<Vec<usize>>,
}

#[async_trait::async_trait]
impl ScopeConsumer for RecordingScope {
    async fn on_results(&self, _report: &Report, results: &[ReportResult], _pre_existed: bool) {
        self.batches.lock().push(results.len());
    }
}

#[derive(Default)]
struct CountingSync(AtomicUsize);

#[async_trait::async_trait]
impl SyncConsumer for CountingSync {
    async fn on_report(&self, _report: &Report) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct Panicking;

#[async_trait::async_trait]
impl ResultConsumer for Panicking {
    async fn on_result(&self, _report: &Report, _result: &ReportResult, _pre_existed: bool) {
        panic!("consumer exploded");
    }
}

fn report(policies: &[(&str, Status)]) -> Report {
    let mut r = Report::new("polr-test", "test");
    for (p, s) in policies {
        r.results.push(ReportResult { policy: p.to_string(), rule: "r".into(), status: *s, ..Default::default() });
    }
    Reconditioner::new().prepare(r)
}

fn cache() -> Arc<dyn ResultCache> {
    Arc::new(InMemoryCache::new(Duration::from_secs(3600), Duration::from_secs(600)))
}

fn listener(skip_existing: bool) -> (ResultListener, Arc<RecordingConsumer>) {
    let l = ResultListener::new(cache(), skip_existing, Utc::now());
    let rec = Arc::new(RecordingConsumer::default());
    l.add_result_consumer(rec.clone());
    (l, rec)
}

#[tokio::test]
async fn delivers_only_new_results() {
    let (l, rec) = listener(false);
    l.handle(&LifecycleEvent::new(EventKind::Added, report(&[("a", Status::Fail), ("b", Status::Fail)]))).await;
    assert_eq!(rec.policies(), vec!["a", "b"]);

    rec.seen.lock().clear();
    l.handle(&LifecycleEvent::new(EventKind::Updated, report(&[("a", Status::Fail), ("c", Status::Fail)]))).await;
    assert_eq!(rec.policies(), vec!["c"]);
}

#[tokio::test]
async fn round_trip_report_yields_one_new_result() {
    let cache = cache();
    let l = ResultListener::new(cache.clone(), false, Utc::now());
    let rec = Arc::new(RecordingConsumer::default());
    l.add_result_consumer(rec.clone());

    let mut raw = Report::new("polr-test", "test");
    raw.results.push(ReportResult {
        policy: "required-label".into(),
        rule: "app-label-required".into(),
        status: Status::Fail,
        ..Default::default()
    });
    let r = Reconditioner::new().prepare(raw);
    let id = r.results[0].id.clone();
    assert!(!id.is_empty());

    l.handle(&LifecycleEvent::new(EventKind::Added, r.clone())).await;
    assert_eq!(rec.policies(), vec!["required-label"]);
    assert_eq!(cache.get_results(&r.id), vec![id]);
}

#[tokio::test]
async fn startup_skip_caches_without_delivering() {
    let (l, rec) = listener(true);
    let mut old = report(&[("a", Status::Fail)]);
    old.creation_timestamp = Utc::now() - ChronoDuration::hours(1);

    l.handle(&LifecycleEvent::new(EventKind::Added, old.clone())).await;
    assert!(rec.policies().is_empty());

    let mut updated = report(&[("a", Status::Fail), ("b", Status::Fail)]);
    updated.creation_timestamp = old.creation_timestamp;
    l.handle(&LifecycleEvent::new(EventKind::Updated, updated)).await;
    assert_eq!(rec.policies(), vec!["b"]);
    assert_eq!(rec.seen.lock()[0].1, false);
}

#[tokio::test]
async fn pre_existed_flag_reaches_consumers_when_not_skipping() {
    let (l, rec) = listener(false);
    let mut old = report(&[("a", Status::Fail)]);
    old.creation_timestamp = Utc::now() - ChronoDuration::hours(1);
    l.handle(&LifecycleEvent::new(EventKind::Added, old)).await;
    assert_eq!(rec.seen.lock().clone(), vec![("a".to_string(), true)]);
}

#[tokio::test]
async fn historical_results_are_skipped_on_startup() {
    let (l, rec) = listener(true);
    let mut r = report(&[("old", Status::Fail), ("fresh", Status::Fail)]);
    r.results[0].timestamp = Some(Utc::now() - ChronoDuration::hours(2));
    l.handle(&LifecycleEvent::new(EventKind::Updated, r)).await;
    assert_eq!(rec.policies(), vec!["fresh"]);
}

#[tokio::test]
async fn pass_and_skip_are_not_delivered() {
    let (l, rec) = listener(false);
    let r = report(&[("p", Status::Pass), ("s", Status::Skip), ("w", Status::Warn), ("e", Status::Error)]);
    l.handle(&LifecycleEvent::new(EventKind::Added, r)).await;
    assert_eq!(rec.policies(), vec!["e", "w"]);
}

#[tokio::test]
async fn sync_consumers_run_and_cache_fills_without_other_consumers() {
    let cache = cache();
    let l = ResultListener::new(cache.clone(), false, Utc::now());
    let sync = Arc::new(CountingSync::default());
    l.add_sync_consumer(sync.clone());

    let r = report(&[("a", Status::Fail)]);
    l.handle(&LifecycleEvent::new(EventKind::Added, r.clone())).await;
    assert_eq!(sync.0.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get_results(&r.id).len(), 1);

    // Consumers registered later only see what is new since.
    let rec = Arc::new(RecordingConsumer::default());
    l.add_result_consumer(rec.clone());
    l.handle(&LifecycleEvent::new(EventKind::Updated, r)).await;
    assert!(rec.policies().is_empty());
}

#[tokio::test]
async fn empty_reports_and_deletes_deliver_nothing() {
    let (l, rec) = listener(false);
    let sync = Arc::new(CountingSync::default());
    l.add_sync_consumer(sync.clone());

    l.handle(&LifecycleEvent::new(EventKind::Updated, report(&[]))).await;
    l.handle(&LifecycleEvent::new(EventKind::Deleted, report(&[("a", Status::Fail)]))).await;
    assert!(rec.policies().is_empty());
    assert_eq!(sync.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scope_consumers_get_one_batch() {
    let l = ResultListener::new(cache(), false, Utc::now());
    let scope = Arc::new(RecordingScope::default());
    l.add_scope_consumer(scope.clone());
    l.handle(&LifecycleEvent::new(EventKind::Added, report(&[("a", Status::Fail), ("b", Status::Warn), ("c", Status::Pass)])))
        .await;
    assert_eq!(scope.batches.lock().clone(), vec![2]);
}

#[tokio::test]
async fn panicking_consumer_does_not_starve_others() {
    let (l, rec) = listener(false);
    l.add_result_consumer(Arc::new(Panicking));
    l.handle(&LifecycleEvent::new(EventKind::Added, report(&[("a", Status::Fail)]))).await;
    assert_eq!(rec.policies(), vec!["a"]);
}

#[tokio::test]
async fn reset_drops_consumers() {
    let (l, rec) = listener(false);
    l.reset();
    l.handle(&LifecycleEvent::new(EventKind::Added, report(&[("a", Status::Fail)]))).await;
    assert!(rec.policies().is_empty());
}
