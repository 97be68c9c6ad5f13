use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use polwatch_core::{EventKind, LifecycleEvent, Report};
use polwatch_recondition::Reconditioner;
use polwatch_store::Debouncer;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{ReportKey, ReportSource, SourceError, SourceFilter};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub filter: SourceFilter,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            filter: SourceFilter::default(),
        }
    }
}

impl QueueConfig {
    /// Exponential backoff for the `attempt`-th retry (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<ReportKey>,
    // Keys waiting in `queue` or re-added while a worker holds them.
    dirty: FxHashSet<ReportKey>,
    processing: FxHashSet<ReportKey>,
    known: FxHashSet<ReportKey>,
    retries: FxHashMap<ReportKey, u32>,
}

struct Inner {
    source: Arc<dyn ReportSource>,
    reconditioner: Reconditioner,
    debouncer: Debouncer,
    cfg: QueueConfig,
    state: Mutex<State>,
    ready: Notify,
}

/// Deduplicating work queue between the watch and the debouncer.
///
/// A key is never handled by two workers at once; adding a key that is being
/// handled schedules one more pass after the current one finishes. Whether a
/// fetched report is Added or Updated follows from the keys seen before, and a
/// report the source no longer has becomes a Deleted tombstone.
#[derive(Clone)]
pub struct ReportQueue {
    inner: Arc<Inner>,
}

impl ReportQueue {
    pub fn new(source: Arc<dyn ReportSource>, reconditioner: Reconditioner, debouncer: Debouncer, cfg: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                reconditioner,
                debouncer,
                cfg,
                state: Mutex::new(State::default()),
                ready: Notify::new(),
            }),
        }
    }

    pub fn add(&self, key: ReportKey) {
        let mut st = self.inner.state.lock();
        if !st.dirty.insert(key.clone()) {
            return;
        }
        if st.processing.contains(&key) {
            return;
        }
        st.queue.push_back(key);
        drop(st);
        self.inner.ready.notify_one();
    }

    /// Keys that produced a report and have not been deleted since.
    pub fn known_keys(&self) -> Vec<ReportKey> {
        self.inner.state.lock().known.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `cfg.workers` workers until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let workers = self.inner.cfg.workers.max(1);
        info!(workers, "report queue started");
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let queue = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { queue.worker(id, cancel).await })
            })
            .collect();
        for res in futures::future::join_all(handles).await {
            if let Err(e) = res {
                error!(error = %e, "queue worker failed");
            }
        }
        info!("report queue stopped");
    }

    async fn worker(&self, id: usize, cancel: CancellationToken) {
        loop {
            let key = tokio::select! {
                _ = cancel.cancelled() => break,
                key = self.next() => key,
            };
            self.process(&key, &cancel).await;
            self.done(&key);
        }
        debug!(worker = id, "queue worker stopped");
    }

    async fn next(&self) -> ReportKey {
        loop {
            // Register interest before checking, so a notify between the check and the await is not lost.
            let notified = self.inner.ready.notified();
            {
                let mut st = self.inner.state.lock();
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    return key;
                }
            }
            notified.await;
        }
    }

    fn done(&self, key: &ReportKey) {
        let mut st = self.inner.state.lock();
        st.processing.remove(key);
        if st.dirty.contains(key) {
            st.queue.push_back(key.clone());
            drop(st);
            self.inner.ready.notify_one();
        }
    }

    fn forget(&self, key: &ReportKey) {
        self.inner.state.lock().retries.remove(key);
    }

    async fn process(&self, key: &ReportKey, cancel: &CancellationToken) {
        match self.inner.source.get(key).await {
            Ok(report) => {
                if !self.inner.cfg.filter.validate(&report) {
                    self.forget(key);
                    counter!("queue_filtered_total", 1u64);
                    debug!(key = %key, "report filtered at intake");
                    return;
                }
                let kind = {
                    let mut st = self.inner.state.lock();
                    st.retries.remove(key);
                    if st.known.insert(key.clone()) {
                        EventKind::Added
                    } else {
                        EventKind::Updated
                    }
                };
                let report = self.inner.reconditioner.prepare(report);
                debug!(key = %key, kind = %kind, results = report.results.len(), "report resolved");
                self.inner.debouncer.add(LifecycleEvent::new(kind, report));
            }
            Err(SourceError::NotFound) => {
                {
                    let mut st = self.inner.state.lock();
                    st.retries.remove(key);
                    st.known.remove(key);
                }
                let report = self.inner.reconditioner.prepare(Report::tombstone(&key.name, &key.namespace));
                debug!(key = %key, "report gone");
                self.inner.debouncer.add(LifecycleEvent::new(EventKind::Deleted, report));
            }
            Err(SourceError::Transient(e)) => self.retry(key, &e, cancel),
            Err(SourceError::Other(e)) => {
                self.forget(key);
                counter!("queue_dropped_total", 1u64);
                warn!(key = %key, error = %e, "dropping report after source error");
            }
        }
    }

    fn retry(&self, key: &ReportKey, err: &str, cancel: &CancellationToken) {
        let attempt = {
            let mut st = self.inner.state.lock();
            let n = st.retries.entry(key.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if attempt > self.inner.cfg.max_retries {
            self.forget(key);
            counter!("queue_dropped_total", 1u64);
            warn!(key = %key, attempts = attempt - 1, error = %err, "dropping report after retries");
            return;
        }
        let delay = self.inner.cfg.backoff(attempt);
        counter!("queue_retries_total", 1u64);
        error!(key = %key, attempt, delay_ms = delay.as_millis() as u64, error = %err, "failed to fetch report; retrying");

        let queue = self.clone();
        let key = key.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }
}
