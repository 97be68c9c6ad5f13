//! polwatch recondition: result ids, defaults and resource attribution applied to
//! every report before it enters the pipeline.

#![forbid(unsafe_code)]

mod field;
mod id;

use polwatch_core::{Priority, Report, ReportResult, Severity, Status};
use rustc_hash::FxHashMap;
use tracing::debug;

pub use field::{Field, FieldError};
pub use id::IdGenerator;

/// Category given to results that do not declare one.
pub const DEFAULT_CATEGORY: &str = "Other";

/// Priority used by targets to rank a result.
pub fn resolve_priority(result: &ReportResult) -> Priority {
    match result.status {
        Status::Skip => Priority::Debug,
        Status::Pass => Priority::Info,
        Status::Error => Priority::Error,
        Status::Warn => Priority::Warning,
        Status::Fail => match result.severity {
            Severity::Unset => Priority::Warning,
            Severity::Critical => Priority::Critical,
            Severity::High => Priority::Error,
            Severity::Medium => Priority::Warning,
            Severity::Low | Severity::Info => Priority::Info,
        },
    }
}

/// Normalizes raw reports: ids, default category, priority and scope attribution.
#[derive(Debug, Clone, Default)]
pub struct Reconditioner {
    default: IdGenerator,
    by_source: FxHashMap<String, IdGenerator>,
}

impl Reconditioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator for a report source; matching is case-insensitive.
    pub fn with_source(mut self, source: &str, generator: IdGenerator) -> Self {
        self.by_source.insert(source.to_ascii_lowercase(), generator);
        self
    }

    pub fn generator_for(&self, source: &str) -> &IdGenerator {
        self.by_source.get(&source.to_ascii_lowercase()).unwrap_or(&self.default)
    }

    pub fn prepare(&self, mut report: Report) -> Report {
        report.id = Report::derive_id(&report.name, &report.namespace);
        let generator = self.generator_for(report.source()).clone();

        // Generators read report metadata only, so the results can be detached while ids are assigned.
        let mut results = std::mem::take(&mut report.results);
        for res in results.iter_mut() {
            res.id = generator.generate(&report, res);
            res.priority = resolve_priority(res);
            if res.category.is_empty() {
                res.category = DEFAULT_CATEGORY.to_string();
            }
            if res.resource.is_none() {
                res.resource = report.scope.clone();
            }
        }
        report.results = results;
        debug!(report = %report.key(), results = report.results.len(), "reconditioned");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polwatch_core::Resource;

    fn raw() -> Report {
        let mut r = Report::new("polr-test", "test");
        r.results.push(ReportResult {
            policy: "required-label".into(),
            rule: "app-label-required".into(),
            status: Status::Fail,
            source: "Kyverno".into(),
            ..Default::default()
        });
        r
    }

    #[test]
    fn assigns_ids_and_defaults() {
        let r = Reconditioner::new().prepare(raw());
        let res = &r.results[0];
        assert!(!res.id.is_empty());
        assert_eq!(res.category, DEFAULT_CATEGORY);
        assert_eq!(res.priority, Priority::Warning);
        assert_eq!(r.id, Report::derive_id("polr-test", "test"));
    }

    #[test]
    fn attaches_scope_to_results_without_resource() {
        let mut r = raw();
        r.scope = Some(Resource { kind: "Deployment".into(), name: "nginx".into(), ..Default::default() });
        r.results.push(ReportResult {
            policy: "other".into(),
            resource: Some(Resource { kind: "Pod".into(), name: "own".into(), ..Default::default() }),
            ..Default::default()
        });
        let r = Reconditioner::new().prepare(r);
        assert_eq!(r.results[0].resource.as_ref().map(|x| x.name.as_str()), Some("nginx"));
        assert_eq!(r.results[1].resource.as_ref().map(|x| x.name.as_str()), Some("own"));
    }

    #[test]
    fn source_override_is_case_insensitive() {
        let custom = IdGenerator::from_fields(&["policy"]).unwrap();
        let expected = custom.generate(&raw(), &raw().results[0]);
        let rec = Reconditioner::new().with_source("kyverno", custom);
        let r = rec.prepare(raw());
        assert_eq!(r.results[0].id, expected);

        let mut other = raw();
        other.results[0].source = "trivy".into();
        let r = rec.prepare(other);
        assert_ne!(r.results[0].id, expected);
    }

    #[test]
    fn keeps_declared_category() {
        let mut r = raw();
        r.results[0].category = "Pod Security".into();
        let r = Reconditioner::new().prepare(r);
        assert_eq!(r.results[0].category, "Pod Security");
    }

    #[test]
    fn priority_mapping() {
        let mut res = ReportResult { status: Status::Fail, severity: Severity::Critical, ..Default::default() };
        assert_eq!(resolve_priority(&res), Priority::Critical);
        res.severity = Severity::High;
        assert_eq!(resolve_priority(&res), Priority::Error);
        res.severity = Severity::Low;
        assert_eq!(resolve_priority(&res), Priority::Info);
        res.status = Status::Skip;
        assert_eq!(resolve_priority(&res), Priority::Debug);
        res.status = Status::Pass;
        assert_eq!(resolve_priority(&res), Priority::Info);
    }
}
