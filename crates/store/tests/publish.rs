#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use polwatch_core::{EventKind, LifecycleEvent, Report};
use polwatch_store::{EventPublisher, ReportListener};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Counting(AtomicUsize);

#[async_trait::async_trait]
impl ReportListener for Counting {
    async fn on_event(&self, _event: &LifecycleEvent) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct Panicking;

#[async_trait::async_trait]
impl ReportListener for Panicking {
    async fn on_event(&self, _event: &LifecycleEvent) {
        panic!("listener bug");
    }
}

fn added() -> LifecycleEvent {
    LifecycleEvent::new(EventKind::Added, Report::new("polr", "ns"))
}

#[tokio::test]
async fn panicking_listener_does_not_block_others() {
    let p = EventPublisher::new();
    let counter = Arc::new(Counting::default());
    p.register("broken", Arc::new(Panicking));
    p.register("counter", counter.clone());

    p.publish(added()).await;
    p.publish(added()).await;
    assert_eq!(counter.0.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn register_replaces_by_name() {
    let p = EventPublisher::new();
    let a = Arc::new(Counting::default());
    let b = Arc::new(Counting::default());
    p.register("metrics", a.clone());
    p.register("metrics", b.clone());
    assert_eq!(p.listener_names(), vec!["metrics".to_string()]);

    p.publish(added()).await;
    assert_eq!(a.0.load(Ordering::SeqCst), 0);
    assert_eq!(b.0.load(Ordering::SeqCst), 1);

    p.unregister("metrics");
    assert!(p.listener_names().is_empty());
}

#[tokio::test]
async fn run_drains_until_channel_closes() {
    let p = EventPublisher::new();
    let counter = Arc::new(Counting::default());
    p.register("counter", counter.clone());

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    for _ in 0..3 {
        tx.send(added()).unwrap();
    }
    drop(tx);
    p.run(rx, CancellationToken::new()).await;
    assert_eq!(counter.0.load(Ordering::SeqCst), 3);
}
