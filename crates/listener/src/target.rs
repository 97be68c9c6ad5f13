use std::sync::Arc;

use polwatch_core::{Report, ReportResult, Status};
use tracing::info;

/// How a target wants results delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    /// One call per new result.
    Single,
    /// One call per report with its new results.
    Batch,
    /// The full validated result set of every report, new or not.
    Sync,
}

/// Delivery endpoint for results.
#[async_trait::async_trait]
pub trait Target: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SendKind {
        SendKind::Single
    }

    fn validate(&self, _report: &Report, _result: &ReportResult) -> bool {
        true
    }

    fn skip_existing_on_startup(&self) -> bool {
        true
    }

    async fn send(&self, result: &ReportResult);

    async fn batch_send(&self, _report: &Report, results: &[ReportResult]) {
        for r in results {
            self.send(r).await;
        }
    }

    /// Remove whatever the target still holds for a report that changed or went away.
    async fn clean_up(&self, _report: &Report) {}
}

#[derive(Clone, Default)]
pub struct TargetCollection {
    targets: Vec<Arc<dyn Target>>,
}

impl TargetCollection {
    pub fn new(targets: Vec<Arc<dyn Target>>) -> Self {
        Self { targets }
    }

    pub fn push(&mut self, target: Arc<dyn Target>) {
        self.targets.push(target);
    }

    pub fn all(&self) -> &[Arc<dyn Target>] {
        &self.targets
    }

    pub fn of_kind(&self, kind: SendKind) -> Vec<Arc<dyn Target>> {
        self.targets.iter().filter(|t| t.kind() == kind).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// True only when every target wants pre-existing results skipped.
    pub fn skip_existing_on_startup(&self) -> bool {
        self.targets.iter().all(|t| t.skip_existing_on_startup())
    }
}

/// Writes each result to the log. Handy as a default sink and for replays.
pub struct LogTarget {
    name: String,
    min_status: Vec<Status>,
    skip_existing: bool,
}

impl LogTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), min_status: Vec::new(), skip_existing: true }
    }

    /// Only log results with one of these statuses.
    pub fn with_statuses(mut self, statuses: Vec<Status>) -> Self {
        self.min_status = statuses;
        self
    }

    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }
}

#[async_trait::async_trait]
impl Target for LogTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, _report: &Report, result: &ReportResult) -> bool {
        self.min_status.is_empty() || self.min_status.contains(&result.status)
    }

    fn skip_existing_on_startup(&self) -> bool {
        self.skip_existing
    }

    async fn send(&self, result: &ReportResult) {
        let resource = result.resource.as_ref().map(|r| format!("{}/{}", r.kind, r.name)).unwrap_or_default();
        info!(
            target_name = %self.name,
            id = %result.id,
            policy = %result.policy,
            rule = %result.rule,
            status = %result.status,
            priority = result.priority.as_str(),
            resource = %resource,
            message = %result.message,
            "policy result"
        );
    }
}
