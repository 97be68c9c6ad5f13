use anyhow::Result;
use futures::StreamExt;
use kube::{
    api::Api,
    core::DynamicObject,
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
};
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{KubeReportSource, ReportKey, ReportQueue};

fn key_of(obj: &DynamicObject) -> Option<ReportKey> {
    let name = obj.metadata.name.clone()?;
    Some(ReportKey::new(obj.metadata.namespace.clone().unwrap_or_default(), name))
}

/// Watch namespaced and cluster reports and enqueue the key of every changed object.
pub async fn watch_reports(source: &KubeReportSource, queue: ReportQueue, namespace: Option<&str>, cancel: CancellationToken) -> Result<()> {
    let reports: Api<DynamicObject> = match namespace {
        Some(ns) => source.reports_in(ns),
        None => source.reports_api(),
    };
    let namespaced = run_watcher("Report", reports, queue.clone(), false, cancel.clone());
    if namespace.is_some() {
        namespaced.await;
        return Ok(());
    }
    let cluster = run_watcher("ClusterReport", source.cluster_reports_api(), queue, true, cancel);
    futures::join!(namespaced, cluster);
    Ok(())
}

async fn run_watcher(kind: &'static str, api: Api<DynamicObject>, queue: ReportQueue, cluster: bool, cancel: CancellationToken) {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(kind, "watcher started");
    loop {
        let ev = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = stream.next() => ev,
        };
        match ev {
            Some(Ok(Event::Applied(o))) | Some(Ok(Event::Deleted(o))) => {
                if let Some(key) = key_of(&o) {
                    queue.add(key);
                }
            }
            Some(Ok(Event::Restarted(list))) => {
                debug!(kind, count = list.len(), "watch restart");
                let listed: FxHashSet<ReportKey> = list.iter().filter_map(key_of).collect();
                // Objects deleted while the watch was down resolve to tombstones.
                for key in queue.known_keys() {
                    if key.namespace.is_empty() == cluster && !listed.contains(&key) {
                        queue.add(key);
                    }
                }
                for key in listed {
                    queue.add(key);
                }
            }
            Some(Err(e)) => warn!(kind, error = %e, "watch error"),
            None => break,
        }
    }
    warn!(kind, "watcher stream ended");
}
