use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus::{GaugeVec, Opts, Registry};
use rustc_hash::FxHashSet;
use tracing::warn;

use crate::labels::Labels;
use crate::MetricsError;

/// Label-keyed gauge storage. Missing labels read as empty values; extra ones are ignored.
pub trait GaugeBackend: Send + Sync {
    fn set(&self, labels: &Labels, value: f64);
    fn add(&self, labels: &Labels, delta: f64);
    /// Current value, or `None` when no series exists for these labels.
    fn get(&self, labels: &Labels) -> Option<f64>;
    fn remove(&self, labels: &Labels);
}

/// A `prometheus` gauge vector registered in an explicit registry.
pub struct PromGauge {
    vec: GaugeVec,
    names: Vec<String>,
    live: Mutex<FxHashSet<Labels>>,
}

impl PromGauge {
    pub fn register(registry: &Registry, name: &str, help: &str, label_names: &[String]) -> Result<Self, MetricsError> {
        let names: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let vec = GaugeVec::new(Opts::new(name, help), &names)?;
        registry.register(Box::new(vec.clone()))?;
        Ok(Self { vec, names: label_names.to_vec(), live: Mutex::new(FxHashSet::default()) })
    }

    pub fn label_names(&self) -> &[String] {
        &self.names
    }

    fn normalize(&self, labels: &Labels) -> Labels {
        self.names.iter().map(|n| (n.clone(), labels.get(n).cloned().unwrap_or_default())).collect()
    }

    fn with<R>(&self, labels: &Labels, f: impl FnOnce(&prometheus::Gauge) -> R) -> Option<R> {
        let map: HashMap<&str, &str> = labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        match self.vec.get_metric_with(&map) {
            Ok(g) => Some(f(&g)),
            Err(e) => {
                warn!(error = %e, "gauge label mismatch");
                None
            }
        }
    }
}

impl GaugeBackend for PromGauge {
    fn set(&self, labels: &Labels, value: f64) {
        let labels = self.normalize(labels);
        if self.with(&labels, |g| g.set(value)).is_some() {
            self.live.lock().insert(labels);
        }
    }

    fn add(&self, labels: &Labels, delta: f64) {
        let labels = self.normalize(labels);
        if self.with(&labels, |g| g.add(delta)).is_some() {
            self.live.lock().insert(labels);
        }
    }

    fn get(&self, labels: &Labels) -> Option<f64> {
        let labels = self.normalize(labels);
        if !self.live.lock().contains(&labels) {
            return None;
        }
        self.with(&labels, |g| g.get())
    }

    fn remove(&self, labels: &Labels) {
        let labels = self.normalize(labels);
        if !self.live.lock().remove(&labels) {
            return;
        }
        let map: HashMap<&str, &str> = labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        if let Err(e) = self.vec.remove(&map) {
            warn!(error = %e, "removing gauge series");
        }
    }
}
