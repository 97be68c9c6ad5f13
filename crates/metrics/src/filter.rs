use polwatch_core::{Report, ReportResult, RuleSet, Rules};
use serde::{Deserialize, Serialize};

use crate::MetricsError;

/// Filter settings as they appear in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub namespaces: RuleSet,
    pub status: RuleSet,
    pub policies: RuleSet,
    pub sources: RuleSet,
    pub severities: RuleSet,
}

/// Decides which results contribute to result gauges.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    namespaces: Rules,
    status: Rules,
    policies: Rules,
    sources: Rules,
    severities: Rules,
}

impl ResultFilter {
    pub fn new(cfg: &FilterConfig) -> Result<Self, MetricsError> {
        Ok(Self {
            namespaces: cfg.namespaces.compile()?,
            status: cfg.status.compile()?,
            policies: cfg.policies.compile()?,
            sources: cfg.sources.compile()?,
            severities: cfg.severities.compile()?,
        })
    }

    pub fn validate(&self, result: &ReportResult) -> bool {
        if !self.namespaces.is_empty() {
            if let Some(res) = &result.resource {
                if !self.namespaces.matches_namespace(&res.namespace) {
                    return false;
                }
            }
        }
        self.status.allows(result.status.as_str())
            && self.policies.allows(&result.policy)
            && self.sources.allows(&result.source)
            && self.severities.allows(result.severity.as_str())
    }
}

/// Decides which reports are tracked at all.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    namespaces: Rules,
    sources: Rules,
}

impl ReportFilter {
    pub fn new(cfg: &FilterConfig) -> Result<Self, MetricsError> {
        Ok(Self { namespaces: cfg.namespaces.compile()?, sources: cfg.sources.compile()? })
    }

    pub fn validate(&self, report: &Report) -> bool {
        if !self.namespaces.is_empty() && !self.namespaces.matches_namespace(&report.namespace) {
            return false;
        }
        // Reports without results carry no source to judge by.
        if self.sources.is_empty() || report.results.is_empty() {
            return true;
        }
        self.sources.matches(report.source())
    }
}
