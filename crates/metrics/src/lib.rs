//! polwatch metrics: report gauges that always mirror the latest report snapshots.
//!
//! Every listener remembers, per report id, the label sets it last wrote
//! ([`GaugeCache`]) and retracts them on the next event for that report, so
//! updates and deletes never leave stale series behind.

#![forbid(unsafe_code)]

mod cache;
mod filter;
mod gauge;
mod labels;
mod listeners;
mod state;

pub use cache::{aggregate, CacheItem, GaugeCache};
pub use filter::{FilterConfig, ReportFilter, ResultFilter};
pub use gauge::{GaugeBackend, PromGauge};
pub use labels::{LabelGenerator, Labels};
pub use listeners::{decrement_or_delete, Flavor, ResultMetricsListener, Scope, SummaryMetricsListener};
pub use state::{MetricsConfig, MetricsMode, MetricsState};

pub use polwatch_core::RuleSet;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("unknown metric label selector {0:?}")]
    UnknownLabel(String),
    #[error("invalid metric label name {0:?}")]
    InvalidLabelName(String),
    #[error("invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics exposition is not utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}
