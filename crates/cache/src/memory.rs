use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use polwatch_core::{ExpiryHeap, Report};
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ResultCache;

/// Token value of entries that are not scheduled for eviction.
const LIVE: u64 = 0;

#[derive(Clone, PartialEq, Eq)]
enum Due {
    Result { report: String, result: String },
    Report(String),
}

#[derive(Default)]
struct Entry {
    ids: FxHashMap<String, u64>,
    removal: u64,
}

#[derive(Default)]
struct State {
    reports: FxHashMap<String, Entry>,
    deadlines: ExpiryHeap<Due>,
}

impl State {
    fn purge(&mut self, now: std::time::Instant) {
        for (due, token) in self.deadlines.pop_due(now) {
            match due {
                Due::Result { report, result } => {
                    let Some(entry) = self.reports.get_mut(&report) else { continue };
                    if entry.ids.get(&result) == Some(&token) {
                        entry.ids.remove(&result);
                    }
                }
                Due::Report(report) => {
                    if self.reports.get(&report).map(|e| e.removal == token).unwrap_or(false) {
                        self.reports.remove(&report);
                        debug!(report = %report, "cache entry evicted");
                    }
                }
            }
        }
    }
}

/// Process-local cache. Expiries live in one deadline heap; expired entries are
/// dropped lazily on every call and by the optional sweeper.
pub struct InMemoryCache {
    keep: Duration,
    keep_report: Duration,
    state: Mutex<State>,
}

impl InMemoryCache {
    pub fn new(keep: Duration, keep_report: Duration) -> Self {
        Self { keep, keep_report, state: Mutex::new(State::default()) }
    }

    /// Number of reports with tracked state.
    pub fn len(&self) -> usize {
        let mut st = self.state.lock();
        st.purge(now());
        st.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically release memory held by expired entries.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => cache.state.lock().purge(now()),
                }
            }
            info!("result cache sweeper stopped");
        })
    }
}

impl ResultCache for InMemoryCache {
    fn add_report(&self, report: &Report) {
        let now = now();
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.purge(now);

        let entry = st.reports.entry(report.id.clone()).or_default();
        entry.removal = LIVE;

        let mut next: FxHashMap<String, u64> = FxHashMap::default();
        for res in &report.results {
            next.insert(res.id.clone(), LIVE);
        }
        for (id, token) in entry.ids.drain() {
            if next.contains_key(&id) {
                continue;
            }
            if token != LIVE {
                next.insert(id, token);
            } else if !self.keep.is_zero() {
                let due = Due::Result { report: report.id.clone(), result: id.clone() };
                next.insert(id, st.deadlines.schedule(due, now + self.keep));
            }
        }
        entry.ids = next;
        debug!(report = %report.key(), ids = entry.ids.len(), "cached results");
    }

    fn remove_report(&self, id: &str) {
        let now = now();
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.purge(now);
        let Some(entry) = st.reports.get_mut(id) else { return };
        if entry.removal != LIVE {
            return;
        }
        if self.keep_report.is_zero() {
            st.reports.remove(id);
            return;
        }
        entry.removal = st.deadlines.schedule(Due::Report(id.to_string()), now + self.keep_report);
    }

    fn get_results(&self, id: &str) -> Vec<String> {
        let mut st = self.state.lock();
        st.purge(now());
        st.reports.get(id).map(|e| e.ids.keys().cloned().collect()).unwrap_or_default()
    }

    fn clear(&self) {
        let mut st = self.state.lock();
        st.reports.clear();
        st.deadlines.clear();
    }

    fn shared(&self) -> bool {
        false
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}
