use polwatch_core::{Report, RuleSet, Rules};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Intake rules for the reports of one source, or of every source when
/// `source` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceValidation {
    pub source: String,
    pub disable_cluster_reports: bool,
    pub sources: RuleSet,
    /// Matched against the kind of the report scope.
    pub kinds: RuleSet,
    /// Matched against the namespace of the report scope.
    pub namespaces: RuleSet,
}

#[derive(Debug, Clone)]
struct CompiledValidation {
    source: String,
    disable_cluster_reports: bool,
    sources: Rules,
    kinds: Rules,
    namespaces: Rules,
}

impl CompiledValidation {
    fn selects(&self, report: &Report) -> bool {
        self.source.is_empty() || self.source.eq_ignore_ascii_case(report.source())
    }

    fn check(&self, report: &Report) -> bool {
        if !self.selects(report) {
            return true;
        }
        if self.disable_cluster_reports && report.is_cluster_scoped() {
            debug!(report = %report.key(), "filter cluster report");
            return false;
        }
        if !self.sources.allows(report.source()) {
            debug!(report = %report.key(), source = %report.source(), "filter report source");
            return false;
        }
        let Some(scope) = &report.scope else {
            return true;
        };
        if !self.kinds.allows(&scope.kind) {
            debug!(report = %report.key(), kind = %scope.kind, "filter scope resource kind");
            return false;
        }
        if !self.namespaces.allows(&scope.namespace) {
            debug!(report = %report.key(), namespace = %scope.namespace, "filter scope resource namespace");
            return false;
        }
        true
    }
}

/// Drops reports at intake, before they reach the debouncer. A report must
/// pass every validation that selects it.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    validations: Vec<CompiledValidation>,
}

impl SourceFilter {
    pub fn new(validations: &[SourceValidation]) -> Result<Self, regex::Error> {
        let validations = validations
            .iter()
            .map(|v| {
                Ok(CompiledValidation {
                    source: v.source.clone(),
                    disable_cluster_reports: v.disable_cluster_reports,
                    sources: v.sources.compile()?,
                    kinds: v.kinds.compile()?,
                    namespaces: v.namespaces.compile()?,
                })
            })
            .collect::<Result<_, regex::Error>>()?;
        Ok(Self { validations })
    }

    pub fn is_empty(&self) -> bool {
        self.validations.is_empty()
    }

    pub fn validate(&self, report: &Report) -> bool {
        self.validations.iter().all(|v| v.check(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polwatch_core::Resource;

    fn rules(include: &[&str], exclude: &[&str]) -> RuleSet {
        RuleSet {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn scoped(source: &str, namespace: &str, kind: &str, scope_ns: &str) -> Report {
        let mut r = Report::new("polr", namespace);
        r.source = source.into();
        r.scope = Some(Resource { kind: kind.into(), namespace: scope_ns.into(), name: "app".into(), ..Default::default() });
        r
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let f = SourceFilter::default();
        assert!(f.is_empty());
        assert!(f.validate(&Report::new("cpolr", "")));
    }

    #[test]
    fn selector_limits_validation_to_one_source() {
        let f = SourceFilter::new(&[SourceValidation {
            source: "Kyverno".into(),
            kinds: rules(&[], &["Pod"]),
            ..Default::default()
        }])
        .unwrap();
        assert!(!f.validate(&scoped("kyverno", "test", "Pod", "test")));
        assert!(f.validate(&scoped("kyverno", "test", "Deployment", "test")));
        assert!(f.validate(&scoped("trivy", "test", "Pod", "test")));
    }

    #[test]
    fn cluster_reports_can_be_disabled() {
        let f = SourceFilter::new(&[SourceValidation { disable_cluster_reports: true, ..Default::default() }]).unwrap();
        assert!(!f.validate(&Report::new("cpolr", "")));
        assert!(f.validate(&Report::new("polr", "test")));
    }

    #[test]
    fn source_and_scope_namespace_rules() {
        let f = SourceFilter::new(&[
            SourceValidation { sources: rules(&["kyverno", "trivy*"], &[]), ..Default::default() },
            SourceValidation { namespaces: rules(&[], &["kube-*"]), ..Default::default() },
        ])
        .unwrap();
        assert!(f.validate(&scoped("trivy-operator", "test", "Pod", "test")));
        assert!(!f.validate(&scoped("falco", "test", "Pod", "test")));
        assert!(!f.validate(&scoped("kyverno", "kube-system", "Pod", "kube-system")));

        // Without a scope only the report-level rules apply.
        let mut unscoped = scoped("kyverno", "kube-system", "Pod", "kube-system");
        unscoped.scope = None;
        assert!(f.validate(&unscoped));
    }

    #[test]
    fn patterns_are_literal_apart_from_wildcards() {
        let f = SourceFilter::new(&[SourceValidation { kinds: rules(&["Pod(v1)"], &[]), ..Default::default() }]).unwrap();
        assert!(f.validate(&scoped("kyverno", "test", "Pod(v1)", "test")));
        assert!(!f.validate(&scoped("kyverno", "test", "Podv1", "test")));
    }
}
