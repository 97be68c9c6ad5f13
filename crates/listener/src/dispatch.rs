use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use polwatch_cache::ResultCache;
use polwatch_core::{EventKind, LifecycleEvent, Report};
use polwatch_store::ReportListener;
use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{ResultConsumer, ScopeConsumer, SyncConsumer};

/// Turns lifecycle events into deliveries of results not seen before.
///
/// Consumer lists can be swapped at any time; each event works on the lists
/// loaded when it arrived.
pub struct ResultListener {
    cache: Arc<dyn ResultCache>,
    skip_existing: bool,
    started: DateTime<Utc>,
    results: ArcSwap<Vec<Arc<dyn ResultConsumer>>>,
    scopes: ArcSwap<Vec<Arc<dyn ScopeConsumer>>>,
    syncs: ArcSwap<Vec<Arc<dyn SyncConsumer>>>,
}

impl ResultListener {
    pub fn new(cache: Arc<dyn ResultCache>, skip_existing: bool, started: DateTime<Utc>) -> Self {
        Self {
            cache,
            skip_existing,
            started,
            results: ArcSwap::from_pointee(Vec::new()),
            scopes: ArcSwap::from_pointee(Vec::new()),
            syncs: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn add_result_consumer(&self, c: Arc<dyn ResultConsumer>) {
        self.results.rcu(|cur| {
            let mut next = Vec::clone(cur);
            next.push(Arc::clone(&c));
            next
        });
    }

    pub fn add_scope_consumer(&self, c: Arc<dyn ScopeConsumer>) {
        self.scopes.rcu(|cur| {
            let mut next = Vec::clone(cur);
            next.push(Arc::clone(&c));
            next
        });
    }

    pub fn add_sync_consumer(&self, c: Arc<dyn SyncConsumer>) {
        self.syncs.rcu(|cur| {
            let mut next = Vec::clone(cur);
            next.push(Arc::clone(&c));
            next
        });
    }

    /// Drop every registered consumer.
    pub fn reset(&self) {
        self.results.store(Arc::new(Vec::new()));
        self.scopes.store(Arc::new(Vec::new()));
        self.syncs.store(Arc::new(Vec::new()));
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    pub async fn handle(&self, event: &LifecycleEvent) {
        let started = std::time::Instant::now();
        let report = &event.report;

        if event.kind == EventKind::Deleted {
            self.cache.remove_report(&report.id);
            return;
        }
        if report.results.is_empty() {
            return;
        }

        let report = Arc::new(report.clone());

        let syncs = self.syncs.load_full();
        if !syncs.is_empty() {
            let handles = syncs
                .iter()
                .map(|c| {
                    let c = Arc::clone(c);
                    let r = Arc::clone(&report);
                    tokio::spawn(async move { c.on_report(&r).await })
                })
                .collect();
            join("sync", &report, handles).await;
        }

        let results = self.results.load_full();
        let scopes = self.scopes.load_full();
        if results.is_empty() && scopes.is_empty() {
            self.cache.add_report(&report);
            return;
        }

        let pre_existed = event.kind == EventKind::Added && report.creation_timestamp < self.started;
        if self.skip_existing && pre_existed {
            debug!(report = %report.key(), "skipping report that existed before startup");
            self.cache.add_report(&report);
            return;
        }

        let seen: FxHashSet<String> = self.cache.get_results(&report.id).into_iter().collect();
        let fresh: Vec<usize> = report
            .results
            .iter()
            .enumerate()
            .filter(|(_, r)| !seen.contains(&r.id) && r.status.is_actionable())
            .filter(|(_, r)| !(self.skip_existing && r.timestamp.map(|t| t < self.started).unwrap_or(false)))
            .map(|(i, _)| i)
            .collect();

        self.cache.add_report(&report);
        if fresh.is_empty() {
            return;
        }
        debug!(report = %report.key(), new = fresh.len(), "dispatching new results");
        counter!("dispatch_results_total", fresh.len() as u64);

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(scopes.len() + fresh.len() * results.len());
        if !scopes.is_empty() {
            let batch: Arc<Vec<_>> = Arc::new(fresh.iter().map(|&i| report.results[i].clone()).collect());
            for c in scopes.iter() {
                let c = Arc::clone(c);
                let r = Arc::clone(&report);
                let batch = Arc::clone(&batch);
                handles.push(tokio::spawn(async move { c.on_results(&r, &batch, pre_existed).await }));
            }
        }
        for &i in &fresh {
            for c in results.iter() {
                let c = Arc::clone(c);
                let r = Arc::clone(&report);
                handles.push(tokio::spawn(async move { c.on_result(&r, &r.results[i], pre_existed).await }));
            }
        }
        join("result", &report, handles).await;
        histogram!("dispatch_ms", started.elapsed().as_secs_f64() * 1000.0);
    }
}

async fn join(stage: &'static str, report: &Report, handles: Vec<JoinHandle<()>>) {
    for res in futures::future::join_all(handles).await {
        if let Err(e) = res {
            warn!(stage, report = %report.key(), error = %e, "consumer failed");
        }
    }
}

#[async_trait::async_trait]
impl ReportListener for ResultListener {
    async fn on_event(&self, event: &LifecycleEvent) {
        self.handle(event).await
    }
}
