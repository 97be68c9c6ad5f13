//! polwatch result cache: remembers which result ids were already seen per report so
//! dispatch can compute what is new, and ages out state of vanished reports.

#![forbid(unsafe_code)]

mod memory;
mod shared;

use polwatch_core::Report;

pub use memory::InMemoryCache;
pub use shared::SharedCache;

/// Result id bookkeeping shared by the dispatch listener.
///
/// Backend failures never surface here: implementations log them and fall back
/// to an empty read or a skipped write.
pub trait ResultCache: Send + Sync {
    /// Track the ids of `report.results`. Ids no longer present are kept until the
    /// keep duration has passed.
    fn add_report(&self, report: &Report);
    /// Schedule every id of the report for eviction after the keep-report duration.
    fn remove_report(&self, id: &str);
    /// All tracked ids for a report, live or pending eviction.
    fn get_results(&self, id: &str) -> Vec<String>;
    fn clear(&self);
    /// Whether other replicas observe the same state.
    fn shared(&self) -> bool;
}
