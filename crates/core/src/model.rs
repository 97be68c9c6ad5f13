use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::hash::fnv1a;

/// Result property a producer sets to opt out of generated ids.
pub const RESULT_ID_KEY: &str = "resultID";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pass,
    Fail,
    Warn,
    Error,
    Skip,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Fail => "fail",
            Status::Warn => "warn",
            Status::Error => "error",
            Status::Skip => "skip",
        }
    }

    /// Fail, warn and error results are worth a notification; pass and skip are not.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Status::Pass | Status::Skip)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pass" => Some(Status::Pass),
            "fail" => Some(Status::Fail),
            "warn" => Some(Status::Warn),
            "error" => Some(Status::Error),
            "skip" => Some(Status::Skip),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    #[serde(rename = "")]
    Unset,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unset => "",
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Unknown values map to `Unset`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "info" => Severity::Info,
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Unset,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    #[serde(rename = "")]
    Default,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Default => "",
            Priority::Debug => "debug",
            Priority::Info => "info",
            Priority::Warning => "warning",
            Priority::Error => "error",
            Priority::Critical => "critical",
        }
    }
}

/// Reference to the Kubernetes object a result (or a whole report) is about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Resource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Summary {
    pub pass: u32,
    pub fail: u32,
    pub warn: u32,
    pub error: u32,
    pub skip: u32,
}

impl Summary {
    pub fn count(&self, status: Status) -> u32 {
        match status {
            Status::Pass => self.pass,
            Status::Fail => self.fail,
            Status::Warn => self.warn,
            Status::Error => self.error,
            Status::Skip => self.skip,
        }
    }
}

/// One policy evaluation outcome inside a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportResult {
    pub id: String,
    pub policy: String,
    pub rule: String,
    #[serde(alias = "result")]
    pub status: Status,
    pub severity: Severity,
    pub priority: Priority,
    pub category: String,
    pub source: String,
    #[serde(alias = "description")]
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub properties: BTreeMap<String, String>,
    pub resource: Option<Resource>,
}

impl ReportResult {
    pub fn has_resource(&self) -> bool {
        self.resource.is_some()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Snapshot of a namespaced report, or a cluster report when `namespace` is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Report {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub creation_timestamp: DateTime<Utc>,
    pub summary: Summary,
    pub scope: Option<Resource>,
    pub results: Vec<ReportResult>,
    pub source: String,
    pub labels: SmallVec<[(String, String); 8]>,
    pub annotations: SmallVec<[(String, String); 4]>,
}

impl Report {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        let namespace = namespace.into();
        Self {
            id: Self::derive_id(&name, &namespace),
            name,
            namespace,
            creation_timestamp: Utc::now(),
            ..Default::default()
        }
    }

    /// Empty report standing in for an object that can no longer be fetched.
    pub fn tombstone(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let mut r = Self::new(name, namespace);
        r.creation_timestamp = DateTime::<Utc>::default();
        r
    }

    /// Stable id for a `(name, namespace)` pair.
    pub fn derive_id(name: &str, namespace: &str) -> String {
        fnv1a([name, namespace]).to_string()
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }

    /// `namespace/name`, or just `name` for cluster reports.
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Declared source, else the source of the first result.
    pub fn source(&self) -> &str {
        if !self.source.is_empty() {
            return &self.source;
        }
        self.results.first().map(|r| r.source.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Added => "added",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        })
    }
}

/// Unit of work flowing through the pipeline after debouncing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub report: Report,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, report: Report) -> Self {
        Self { kind, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_id_is_stable_per_name_and_namespace() {
        let a = Report::new("polr-test", "test");
        let b = Report::new("polr-test", "test");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, Report::new("polr-test", "other").id);
        assert_ne!(a.id, Report::new("polr-test2", "test").id);
    }

    #[test]
    fn id_keeps_name_and_namespace_apart() {
        assert_ne!(Report::new("foobar", "").id, Report::new("foo", "bar").id);
        assert_ne!(Report::new("foo", "bar").id, Report::new("foob", "ar").id);
    }

    #[test]
    fn cluster_scope_is_empty_namespace() {
        let r = Report::new("cpolr", "");
        assert!(r.is_cluster_scoped());
        assert_eq!(r.key(), "cpolr");
        assert_eq!(Report::new("polr", "ns").key(), "ns/polr");
    }

    #[test]
    fn source_falls_back_to_first_result() {
        let mut r = Report::new("polr", "ns");
        r.results.push(ReportResult { source: "kyverno".into(), ..Default::default() });
        assert_eq!(r.source(), "kyverno");
        r.source = "trivy".into();
        assert_eq!(r.source(), "trivy");
    }

    #[test]
    fn deserializes_wire_aliases() {
        let res: ReportResult = serde_json::from_value(serde_json::json!({
            "policy": "required-label",
            "result": "fail",
            "description": "missing label",
            "severity": "high",
        }))
        .unwrap();
        assert_eq!(res.status, Status::Fail);
        assert_eq!(res.message, "missing label");
        assert_eq!(res.severity, Severity::High);
    }

    #[test]
    fn actionable_statuses() {
        assert!(Status::Fail.is_actionable());
        assert!(Status::Warn.is_actionable());
        assert!(Status::Error.is_actionable());
        assert!(!Status::Pass.is_actionable());
        assert!(!Status::Skip.is_actionable());
    }
}
