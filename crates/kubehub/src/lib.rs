//! polwatch kubehub: resolves watched report keys into reports and feeds them,
//! reconditioned, into the debouncer.

#![forbid(unsafe_code)]

mod filter;
mod mapping;
mod queue;
mod source;
mod watch;

use std::fmt;
use std::str::FromStr;

pub use filter::{SourceFilter, SourceValidation};
pub use mapping::report_from_object;
pub use queue::{QueueConfig, ReportQueue};
pub use source::KubeReportSource;
pub use watch::watch_reports;

use polwatch_core::Report;

/// Identity of a report object as the watch sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReportKey {
    pub namespace: String,
    pub name: String,
}

impl ReportKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new("", name)
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ReportKey {
    type Err = std::convert::Infallible;

    /// `namespace/name`, or a bare `name` for cluster reports.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('/') {
            Some((ns, name)) => Self::new(ns, name),
            None => Self::cluster(s),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("report not found")]
    NotFound,
    #[error("transient source error: {0}")]
    Transient(String),
    #[error("source error: {0}")]
    Other(String),
}

/// Fetches the current snapshot of a report by key.
#[async_trait::async_trait]
pub trait ReportSource: Send + Sync {
    async fn get(&self, key: &ReportKey) -> Result<Report, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_and_parse() {
        let k: ReportKey = "test/polr-test".parse().unwrap();
        assert_eq!(k, ReportKey::new("test", "polr-test"));
        assert_eq!(k.to_string(), "test/polr-test");
        let c: ReportKey = "cpolr".parse().unwrap();
        assert_eq!(c.namespace, "");
        assert_eq!(c.to_string(), "cpolr");
    }
}
