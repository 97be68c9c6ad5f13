use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::labels::Labels;

/// One series a report contributed to, and by how much.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    pub labels: Labels,
    pub value: f64,
}

/// Collapse label sets into items, counting duplicates.
pub fn aggregate(sets: impl IntoIterator<Item = Labels>) -> Vec<CacheItem> {
    let mut out: Vec<CacheItem> = Vec::new();
    let mut index: FxHashMap<Labels, usize> = FxHashMap::default();
    for labels in sets {
        match index.get(&labels) {
            Some(&i) => out[i].value += 1.0,
            None => {
                index.insert(labels.clone(), out.len());
                out.push(CacheItem { labels, value: 1.0 });
            }
        }
    }
    out
}

/// Per report id, the series last emitted for it.
#[derive(Default)]
pub struct GaugeCache {
    entries: Mutex<FxHashMap<String, Vec<CacheItem>>>,
}

impl GaugeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `items` for `id` and return what was stored before.
    pub fn replace(&self, id: &str, items: Vec<CacheItem>) -> Vec<CacheItem> {
        self.entries.lock().insert(id.to_string(), items).unwrap_or_default()
    }

    pub fn take(&self, id: &str) -> Vec<CacheItem> {
        self.entries.lock().remove(id).unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Vec<CacheItem> {
        self.entries.lock().get(id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
