use std::collections::BTreeMap;

use polwatch_core::{Report, ReportResult};

use crate::MetricsError;

/// Label name to value. Keys are kept sorted, so equal sets compare and hash
/// equal however they were built, and a set can key a map directly.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Namespace,
    Report,
    Policy,
    Rule,
    Kind,
    Name,
    Severity,
    Category,
    Source,
    Status,
    ReportLabel(String),
    Property(String),
}

impl Part {
    fn parse(selector: &str) -> Result<Self, MetricsError> {
        if let Some(k) = selector.strip_prefix("label:") {
            return Ok(Part::ReportLabel(k.to_string()));
        }
        if let Some(k) = selector.strip_prefix("property:") {
            return Ok(Part::Property(k.to_string()));
        }
        Ok(match selector {
            "namespace" => Part::Namespace,
            "report" => Part::Report,
            "policy" => Part::Policy,
            "rule" => Part::Rule,
            "kind" => Part::Kind,
            "name" => Part::Name,
            "severity" => Part::Severity,
            "category" => Part::Category,
            "source" => Part::Source,
            "status" => Part::Status,
            other => return Err(MetricsError::UnknownLabel(other.to_string())),
        })
    }

    fn value(&self, report: &Report, result: &ReportResult) -> String {
        let res = result.resource.as_ref();
        match self {
            Part::Namespace => report.namespace.clone(),
            Part::Report => report.name.clone(),
            Part::Policy => result.policy.clone(),
            Part::Rule => result.rule.clone(),
            Part::Kind => res.map(|r| r.kind.clone()).unwrap_or_default(),
            Part::Name => res.map(|r| r.name.clone()).unwrap_or_default(),
            Part::Severity => result.severity.as_str().to_string(),
            Part::Category => result.category.clone(),
            Part::Source => result.source.clone(),
            Part::Status => result.status.as_str().to_string(),
            Part::ReportLabel(k) => report.label(k).unwrap_or_default().to_string(),
            Part::Property(k) => result.property(k).unwrap_or_default().to_string(),
        }
    }
}

/// Builds the label set of a result from an ordered list of selectors.
#[derive(Debug, Clone)]
pub struct LabelGenerator {
    parts: Vec<(String, Part)>,
}

const SIMPLE: &[&str] = &["namespace", "policy", "status", "severity", "category", "source"];
const DETAILED: &[&str] =
    &["namespace", "rule", "policy", "report", "kind", "name", "status", "severity", "category", "source"];

impl LabelGenerator {
    /// `selectors` are field names or `label:<key>` / `property:<key>`. `names`
    /// optionally renames them position by position.
    pub fn new<S: AsRef<str>>(selectors: &[S], names: &[S]) -> Result<Self, MetricsError> {
        let mut parts = Vec::with_capacity(selectors.len());
        for (i, sel) in selectors.iter().enumerate() {
            let sel = sel.as_ref().trim();
            let part = Part::parse(sel)?;
            let name = match names.get(i).map(|n| n.as_ref().trim()).filter(|n| !n.is_empty()) {
                Some(n) => n.to_string(),
                None => sanitize(sel.rsplit(':').next().unwrap_or(sel)),
            };
            if !valid_name(&name) {
                return Err(MetricsError::InvalidLabelName(name));
            }
            parts.push((name, part));
        }
        Ok(Self { parts })
    }

    pub fn simple() -> Self {
        Self::fixed(SIMPLE)
    }

    pub fn detailed() -> Self {
        Self::fixed(DETAILED)
    }

    fn fixed(selectors: &[&str]) -> Self {
        let parts = selectors.iter().filter_map(|s| Part::parse(s).ok().map(|p| (s.to_string(), p))).collect();
        Self { parts }
    }

    /// Same generator minus one label, e.g. `namespace` for cluster reports.
    pub fn without(mut self, name: &str) -> Self {
        self.parts.retain(|(n, _)| n != name);
        self
    }

    pub fn label_names(&self) -> Vec<String> {
        self.parts.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn generate(&self, report: &Report, result: &ReportResult) -> Labels {
        self.parts.iter().map(|(name, part)| (name.clone(), part.value(report, result))).collect()
    }
}

fn sanitize(s: &str) -> String {
    let mut out: String = s.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
