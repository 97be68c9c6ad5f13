use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use polwatch_core::{EventKind, ExpiryHeap, LifecycleEvent};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Held {
    event: LifecycleEvent,
    token: u64,
}

struct State {
    pending: FxHashMap<String, Held>,
    deadlines: ExpiryHeap<String>,
    tx: Option<mpsc::UnboundedSender<LifecycleEvent>>,
}

struct Inner {
    window: Duration,
    state: Mutex<State>,
    wake: Notify,
    cancel: CancellationToken,
}

/// Holds back empty updates that usually precede the real content of a report.
///
/// Added and Deleted events pass straight through and drop anything held for the
/// same report. An Updated event with no results is held for `window`; later events
/// for that report replace the held one without moving its deadline, and whatever
/// is held when the deadline passes is emitted. Non-empty updates with nothing
/// held pass straight through.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl Debouncer {
    /// Start the deadline sweeper and return the debouncer with its output channel.
    pub fn spawn(window: Duration, cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            window,
            state: Mutex::new(State { pending: FxHashMap::default(), deadlines: ExpiryHeap::new(), tx: Some(tx) }),
            wake: Notify::new(),
            cancel: cancel.child_token(),
        });
        tokio::spawn(sweep(Arc::clone(&inner)));
        (Self { inner }, rx)
    }

    pub fn add(&self, event: LifecycleEvent) {
        let key = event.report.id.clone();
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        let Some(tx) = st.tx.clone() else {
            debug!(report = %event.report.key(), "debouncer closed; dropping event");
            return;
        };

        if event.kind != EventKind::Updated {
            if st.pending.remove(&key).is_some() {
                debug!(report = %event.report.key(), kind = %event.kind, "held update superseded");
            }
            emit(&tx, event);
            return;
        }

        if let Some(held) = st.pending.get_mut(&key) {
            debug!(report = %event.report.key(), results = event.report.results.len(), "coalesced into held update");
            held.event = event;
            counter!("debounce_coalesced_total", 1u64);
            return;
        }

        if event.report.results.is_empty() {
            let at = Instant::now() + self.inner.window;
            let token = st.deadlines.schedule(key.clone(), at.into_std());
            debug!(report = %event.report.key(), window_ms = self.inner.window.as_millis() as u64, "holding empty update");
            st.pending.insert(key, Held { event, token });
            counter!("debounce_held_total", 1u64);
            drop(guard);
            self.inner.wake.notify_one();
            return;
        }

        emit(&tx, event);
    }

    /// Number of updates currently held back.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Drop everything held without emitting it.
    pub fn reset(&self) {
        let mut st = self.inner.state.lock();
        st.pending.clear();
        st.deadlines.clear();
    }

    /// Stop accepting events, discard held ones and end the output channel.
    pub fn close(&self) {
        {
            let mut st = self.inner.state.lock();
            st.tx = None;
            st.pending.clear();
            st.deadlines.clear();
        }
        self.inner.cancel.cancel();
    }
}

fn emit(tx: &mpsc::UnboundedSender<LifecycleEvent>, event: LifecycleEvent) {
    debug!(report = %event.report.key(), kind = %event.kind, results = event.report.results.len(), "emit");
    if tx.send(event).is_ok() {
        counter!("debounce_emitted_total", 1u64);
    }
}

async fn sweep(inner: Arc<Inner>) {
    loop {
        let next = inner.state.lock().deadlines.next_deadline();
        let sleep = async {
            match next {
                Some(at) => tokio::time::sleep_until(Instant::from_std(at)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = inner.wake.notified() => continue,
            _ = sleep => {}
        }

        let now = Instant::now().into_std();
        let mut guard = inner.state.lock();
        let st = &mut *guard;
        for (key, token) in st.deadlines.pop_due(now) {
            let current = st.pending.get(&key).map(|h| h.token == token).unwrap_or(false);
            if !current {
                continue;
            }
            if let (Some(held), Some(tx)) = (st.pending.remove(&key), st.tx.as_ref()) {
                emit(tx, held.event);
            }
        }
    }
    info!("debounce sweeper stopped");
}
