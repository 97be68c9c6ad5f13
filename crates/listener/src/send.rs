use std::sync::Arc;

use polwatch_core::{EventKind, LifecycleEvent, Report, ReportResult};
use polwatch_store::ReportListener;
use tracing::{debug, warn};

use crate::{ResultConsumer, ScopeConsumer, SendKind, SyncConsumer, Target, TargetCollection};

async fn join_all(kind: &'static str, handles: Vec<tokio::task::JoinHandle<()>>) {
    for res in futures::future::join_all(handles).await {
        if let Err(e) = res {
            warn!(kind, error = %e, "target call failed");
        }
    }
}

fn spawn_each<F, Fut>(targets: Vec<Arc<dyn Target>>, f: F) -> Vec<tokio::task::JoinHandle<()>>
where
    F: Fn(Arc<dyn Target>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    targets.into_iter().map(|t| tokio::spawn(f(t))).collect()
}

/// Sends every new result to the single-send targets that accept it.
pub struct SendResultListener {
    targets: TargetCollection,
}

impl SendResultListener {
    pub fn new(targets: TargetCollection) -> Self {
        Self { targets }
    }
}

#[async_trait::async_trait]
impl ResultConsumer for SendResultListener {
    async fn on_result(&self, report: &Report, result: &ReportResult, pre_existed: bool) {
        let report = Arc::new(report.clone());
        let result = Arc::new(result.clone());
        let handles = spawn_each(self.targets.of_kind(SendKind::Single), |t| {
            let report = Arc::clone(&report);
            let result = Arc::clone(&result);
            async move {
                if pre_existed && t.skip_existing_on_startup() {
                    return;
                }
                if !t.validate(&report, &result) {
                    return;
                }
                t.send(&result).await;
            }
        });
        join_all("single", handles).await;
    }
}

/// Sends the new results of a report as one batch to each batch target.
pub struct SendScopeResultsListener {
    targets: TargetCollection,
}

impl SendScopeResultsListener {
    pub fn new(targets: TargetCollection) -> Self {
        Self { targets }
    }
}

#[async_trait::async_trait]
impl ScopeConsumer for SendScopeResultsListener {
    async fn on_results(&self, report: &Report, results: &[ReportResult], pre_existed: bool) {
        let report = Arc::new(report.clone());
        let results: Arc<[ReportResult]> = results.into();
        let handles = spawn_each(self.targets.of_kind(SendKind::Batch), |t| {
            let report = Arc::clone(&report);
            let results = Arc::clone(&results);
            async move {
                if pre_existed && t.skip_existing_on_startup() {
                    return;
                }
                let accepted: Vec<ReportResult> = results.iter().filter(|r| t.validate(&report, r)).cloned().collect();
                if accepted.is_empty() {
                    return;
                }
                debug!(target_name = %t.name(), report = %report.key(), results = accepted.len(), "batch send");
                t.batch_send(&report, &accepted).await;
            }
        });
        join_all("batch", handles).await;
    }
}

/// Mirrors the full validated result set of every report to sync targets.
pub struct SendSyncResultsListener {
    targets: TargetCollection,
}

impl SendSyncResultsListener {
    pub fn new(targets: TargetCollection) -> Self {
        Self { targets }
    }
}

#[async_trait::async_trait]
impl SyncConsumer for SendSyncResultsListener {
    async fn on_report(&self, report: &Report) {
        let report = Arc::new(report.clone());
        let handles = spawn_each(self.targets.of_kind(SendKind::Sync), |t| {
            let report = Arc::clone(&report);
            async move {
                let accepted: Vec<ReportResult> =
                    report.results.iter().filter(|r| t.validate(&report, r)).cloned().collect();
                t.batch_send(&report, &accepted).await;
            }
        });
        join_all("sync", handles).await;
    }
}

/// Lets targets drop state for reports that were deleted, or updated with results they accept.
pub struct CleanupListener {
    targets: TargetCollection,
}

impl CleanupListener {
    pub fn new(targets: TargetCollection) -> Self {
        Self { targets }
    }
}

#[async_trait::async_trait]
impl ReportListener for CleanupListener {
    async fn on_event(&self, event: &LifecycleEvent) {
        let deleted = event.kind == EventKind::Deleted;
        let report = Arc::new(event.report.clone());
        let handles = spawn_each(self.targets.all().to_vec(), |t| {
            let report = Arc::clone(&report);
            async move {
                if !deleted && !report.results.iter().any(|r| t.validate(&report, r)) {
                    return;
                }
                t.clean_up(&report).await;
            }
        });
        join_all("cleanup", handles).await;
    }
}
