use std::sync::Arc;

use arc_swap::ArcSwap;
use polwatch_core::LifecycleEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Consumer of every lifecycle event leaving the debouncer.
#[async_trait::async_trait]
pub trait ReportListener: Send + Sync {
    async fn on_event(&self, event: &LifecycleEvent);
}

type Named = (String, Arc<dyn ReportListener>);

/// Delivers each event to all registered listeners concurrently and waits for
/// them before taking the next event, so per-report order is preserved.
pub struct EventPublisher {
    listeners: ArcSwap<Vec<Named>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self { listeners: ArcSwap::from_pointee(Vec::new()) }
    }

    /// Register under `name`; an existing listener with that name is replaced.
    pub fn register(&self, name: impl Into<String>, listener: Arc<dyn ReportListener>) {
        let name = name.into();
        self.listeners.rcu(|cur| {
            let mut next: Vec<Named> = cur.iter().filter(|(n, _)| *n != name).cloned().collect();
            next.push((name.clone(), Arc::clone(&listener)));
            next
        });
    }

    pub fn unregister(&self, name: &str) {
        self.listeners.rcu(|cur| cur.iter().filter(|(n, _)| n != name).cloned().collect::<Vec<_>>());
    }

    pub fn listener_names(&self) -> Vec<String> {
        self.listeners.load().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Fan one event out. A panicking listener is logged and does not affect the others.
    pub async fn publish(&self, event: LifecycleEvent) {
        let event = Arc::new(event);
        let listeners = self.listeners.load_full();
        let mut names = Vec::with_capacity(listeners.len());
        let mut handles = Vec::with_capacity(listeners.len());
        for (name, listener) in listeners.iter() {
            let listener = Arc::clone(listener);
            let ev = Arc::clone(&event);
            names.push(name.as_str());
            handles.push(tokio::spawn(async move { listener.on_event(&ev).await }));
        }
        for (name, res) in names.into_iter().zip(futures::future::join_all(handles).await) {
            if let Err(e) = res {
                warn!(listener = %name, report = %event.report.key(), error = %e, "listener failed");
            }
        }
    }

    /// Drain the channel until it closes or `cancel` fires.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<LifecycleEvent>, cancel: CancellationToken) {
        info!(listeners = ?self.listener_names(), "publisher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(event) => self.publish(event).await,
                    None => break,
                },
            }
        }
        info!("publisher stopped");
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
