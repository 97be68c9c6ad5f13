use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use polwatch_core::Report;
use polwatch_persist::KvStore;
use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ResultCache;

const LIVE: &str = "live";
const EXPIRING: &str = "expiring";

/// Cache kept in a [`KvStore`] shared between replicas.
///
/// Every tracked id is its own key `<prefix>:<report>:<result>`, so expiry is
/// handled per id by the store itself.
pub struct SharedCache {
    store: Arc<dyn KvStore>,
    prefix: String,
    keep: Duration,
    keep_report: Duration,
}

impl SharedCache {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>, keep: Duration, keep_report: Duration) -> Self {
        Self { store, prefix: prefix.into(), keep, keep_report }
    }

    fn report_prefix(&self, report: &str) -> String {
        format!("{}:{}:", self.prefix, report)
    }

    fn keys(&self, report: &str) -> Vec<String> {
        match self.store.keys(&self.report_prefix(report)) {
            Ok(keys) => keys,
            Err(e) => {
                backend_error("keys", report, &e);
                Vec::new()
            }
        }
    }

    /// Periodically compact expired keys in the backing store.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = cache.store.purge_expired() {
                            backend_error("purge", "*", &e);
                        }
                    }
                }
            }
            info!("shared cache sweeper stopped");
        })
    }
}

fn backend_error(op: &'static str, report: &str, e: &anyhow::Error) {
    counter!("cache_backend_errors_total", 1u64, "op" => op);
    warn!(op, report = %report, error = %e, "shared cache backend error");
}

impl ResultCache for SharedCache {
    fn add_report(&self, report: &Report) {
        let prefix = self.report_prefix(&report.id);
        let current: FxHashSet<&str> = report.results.iter().map(|r| r.id.as_str()).collect();

        for key in self.keys(&report.id) {
            let id = key.strip_prefix(&prefix).unwrap_or(&key);
            if current.contains(id) {
                continue;
            }
            // Ids already expiring keep their first deadline.
            match self.store.get(&key) {
                Ok(Some(v)) if v == EXPIRING => {}
                Ok(Some(_)) => {
                    if let Err(e) = self.store.set(&key, EXPIRING, Some(self.keep)) {
                        backend_error("set", &report.id, &e);
                    }
                }
                Ok(None) => {}
                Err(e) => backend_error("get", &report.id, &e),
            }
        }

        for id in current {
            if let Err(e) = self.store.set(&format!("{}{}", prefix, id), LIVE, None) {
                backend_error("set", &report.id, &e);
            }
        }
        debug!(report = %report.key(), ids = report.results.len(), "cached results");
    }

    fn remove_report(&self, id: &str) {
        for key in self.keys(id) {
            if let Err(e) = self.store.expire(&key, self.keep_report) {
                backend_error("expire", id, &e);
            }
        }
    }

    fn get_results(&self, id: &str) -> Vec<String> {
        let prefix = self.report_prefix(id);
        self.keys(id).into_iter().filter_map(|k| k.strip_prefix(&prefix).map(str::to_string)).collect()
    }

    fn clear(&self) {
        let keys = match self.store.keys(&format!("{}:", self.prefix)) {
            Ok(keys) => keys,
            Err(e) => return backend_error("keys", "*", &e),
        };
        if let Err(e) = self.store.del(&keys) {
            backend_error("del", "*", &e);
        }
    }

    fn shared(&self) -> bool {
        true
    }
}
