use std::sync::Arc;

use polwatch_store::{EventPublisher, ReportListener};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::filter::{FilterConfig, ReportFilter, ResultFilter};
use crate::gauge::{GaugeBackend, PromGauge};
use crate::labels::LabelGenerator;
use crate::listeners::{Flavor, ResultMetricsListener, Scope, SummaryMetricsListener};
use crate::MetricsError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsMode {
    #[default]
    Simple,
    Detailed,
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub mode: MetricsMode,
    /// Selectors for `custom` mode; falls back to the simple label set when empty.
    pub custom_labels: Vec<String>,
    pub label_names: Vec<String>,
    pub filter: FilterConfig,
}

/// Report gauges, the registry they live in and the listeners that keep them current.
pub struct MetricsState {
    registry: Registry,
    listeners: Vec<(String, Arc<dyn ReportListener>)>,
}

impl MetricsState {
    pub fn new(cfg: &MetricsConfig) -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new(), cfg)
    }

    pub fn with_registry(registry: Registry, cfg: &MetricsConfig) -> Result<Self, MetricsError> {
        let results = ResultFilter::new(&cfg.filter)?;
        let reports = ReportFilter::new(&cfg.filter)?;
        let (flavor, labels) = match cfg.mode {
            MetricsMode::Simple => (Flavor::Aggregate, LabelGenerator::simple()),
            MetricsMode::Detailed => (Flavor::Detailed, LabelGenerator::detailed()),
            MetricsMode::Custom if cfg.custom_labels.is_empty() => (Flavor::Aggregate, LabelGenerator::simple()),
            MetricsMode::Custom => (Flavor::Aggregate, LabelGenerator::new(&cfg.custom_labels, &cfg.label_names)?),
        };
        let cluster_labels = labels.clone().without("namespace");

        let mut listeners: Vec<(String, Arc<dyn ReportListener>)> = Vec::new();
        for (scope, name, summary_gauge, result_gauge, labels) in [
            (Scope::Namespaced, "metrics.namespaced", "policy_report_summary", "policy_report_result", labels),
            (Scope::Cluster, "metrics.cluster", "cluster_policy_report_summary", "cluster_policy_report_result", cluster_labels),
        ] {
            let summary: Arc<dyn GaugeBackend> = Arc::new(PromGauge::register(
                &registry,
                summary_gauge,
                "Summary of all policy reports",
                &SummaryMetricsListener::label_names(scope),
            )?);
            let result: Arc<dyn GaugeBackend> =
                Arc::new(PromGauge::register(&registry, result_gauge, "Policy report results", &labels.label_names())?);
            listeners.push((
                format!("{}.summary", name),
                Arc::new(SummaryMetricsListener::new(scope, summary, reports.clone())),
            ));
            listeners.push((
                format!("{}.results", name),
                Arc::new(ResultMetricsListener::new(flavor, scope, result, labels, results.clone(), reports.clone())),
            ));
        }
        info!(mode = ?cfg.mode, listeners = listeners.len(), "report metrics configured");
        Ok(Self { registry, listeners })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn listeners(&self) -> &[(String, Arc<dyn ReportListener>)] {
        &self.listeners
    }

    pub fn register_with(&self, publisher: &EventPublisher) {
        for (name, listener) in &self.listeners {
            publisher.register(name.clone(), Arc::clone(listener));
        }
    }

    /// Prometheus text exposition of every report gauge.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
