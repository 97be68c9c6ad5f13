//! polwatch listener: decides which results of a report are new and hands them to
//! consumers and delivery targets.

#![forbid(unsafe_code)]

mod dispatch;
mod send;
mod target;

use polwatch_core::{Report, ReportResult};

pub use dispatch::ResultListener;
pub use send::{CleanupListener, SendResultListener, SendScopeResultsListener, SendSyncResultsListener};
pub use target::{LogTarget, SendKind, Target, TargetCollection};

/// Called once per new result.
#[async_trait::async_trait]
pub trait ResultConsumer: Send + Sync {
    async fn on_result(&self, report: &Report, result: &ReportResult, pre_existed: bool);
}

/// Called once per report with all of its new results.
#[async_trait::async_trait]
pub trait ScopeConsumer: Send + Sync {
    async fn on_results(&self, report: &Report, results: &[ReportResult], pre_existed: bool);
}

/// Called with every non-empty report before novelty is decided.
#[async_trait::async_trait]
pub trait SyncConsumer: Send + Sync {
    async fn on_report(&self, report: &Report);
}
