//! polwatch core types: policy reports, results and lifecycle events.

#![forbid(unsafe_code)]

mod expiry;
mod hash;
mod model;
mod rules;

pub use expiry::ExpiryHeap;
pub use hash::{fnv1a, Fnv64};
pub use rules::{RuleSet, Rules};
pub use model::{
    EventKind, LifecycleEvent, Priority, Report, ReportResult, Resource, Severity, Status, Summary,
    RESULT_ID_KEY,
};

pub mod prelude {
    pub use super::{
        EventKind, LifecycleEvent, Priority, Report, ReportResult, Resource, Severity, Status, Summary,
    };
}
