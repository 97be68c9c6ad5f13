//! polwatch store: turns raw per-object watch events into clean lifecycle events
//! and fans them out to listeners.

#![forbid(unsafe_code)]

mod debounce;
mod publish;

pub use debounce::Debouncer;
pub use publish::{EventPublisher, ReportListener};
