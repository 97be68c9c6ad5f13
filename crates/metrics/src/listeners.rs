use std::sync::Arc;

use polwatch_core::{EventKind, LifecycleEvent, Report, Status};
use polwatch_store::ReportListener;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::cache::{aggregate, CacheItem, GaugeCache};
use crate::filter::{ReportFilter, ResultFilter};
use crate::gauge::GaugeBackend;
use crate::labels::{LabelGenerator, Labels};

/// Which reports a listener is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

impl Scope {
    fn accepts(&self, report: &Report) -> bool {
        match self {
            Scope::Namespaced => !report.is_cluster_scoped(),
            Scope::Cluster => report.is_cluster_scoped(),
        }
    }
}

/// How result series are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Every validated result is a series set to 1.
    Detailed,
    /// Series count results; reports sharing a label set add up.
    Aggregate,
}

/// Lowers `labels` by `by`. The series is deleted only when that brings it to exactly zero.
pub fn decrement_or_delete(gauge: &dyn GaugeBackend, labels: &Labels, by: f64) {
    match gauge.get(labels) {
        None => {}
        Some(current) if current == by => gauge.remove(labels),
        Some(_) => gauge.add(labels, -by),
    }
}

fn remove_stale(gauge: &dyn GaugeBackend, prev: &[CacheItem], next: &[CacheItem]) {
    let keep: FxHashSet<&Labels> = next.iter().map(|i| &i.labels).collect();
    for item in prev {
        if !keep.contains(&item.labels) {
            gauge.remove(&item.labels);
        }
    }
}

/// Keeps a result gauge equal to the validated results of each report's latest snapshot.
pub struct ResultMetricsListener {
    flavor: Flavor,
    scope: Scope,
    gauge: Arc<dyn GaugeBackend>,
    labels: LabelGenerator,
    results: ResultFilter,
    reports: ReportFilter,
    cache: GaugeCache,
}

impl ResultMetricsListener {
    pub fn new(
        flavor: Flavor,
        scope: Scope,
        gauge: Arc<dyn GaugeBackend>,
        labels: LabelGenerator,
        results: ResultFilter,
        reports: ReportFilter,
    ) -> Self {
        Self { flavor, scope, gauge, labels, results, reports, cache: GaugeCache::new() }
    }

    pub fn cache(&self) -> &GaugeCache {
        &self.cache
    }

    fn items(&self, report: &Report) -> Vec<CacheItem> {
        aggregate(
            report
                .results
                .iter()
                .filter(|r| self.results.validate(r))
                .map(|r| self.labels.generate(report, r)),
        )
    }

    pub fn handle(&self, event: &LifecycleEvent) {
        let report = &event.report;
        if !self.scope.accepts(report) || !self.reports.validate(report) {
            return;
        }
        let next = match event.kind {
            EventKind::Deleted => Vec::new(),
            EventKind::Added | EventKind::Updated => self.items(report),
        };
        let prev = if event.kind == EventKind::Deleted {
            self.cache.take(&report.id)
        } else {
            self.cache.replace(&report.id, next.clone())
        };
        let gauge = self.gauge.as_ref();

        match self.flavor {
            Flavor::Detailed => {
                remove_stale(gauge, &prev, &next);
                for item in &next {
                    gauge.set(&item.labels, 1.0);
                }
            }
            Flavor::Aggregate => {
                for item in &prev {
                    decrement_or_delete(gauge, &item.labels, item.value);
                }
                for item in &next {
                    gauge.add(&item.labels, item.value);
                }
            }
        }
        debug!(report = %report.key(), kind = %event.kind, retracted = prev.len(), emitted = next.len(), "result gauges synced");
    }
}

#[async_trait::async_trait]
impl ReportListener for ResultMetricsListener {
    async fn on_event(&self, event: &LifecycleEvent) {
        self.handle(event)
    }
}

const SUMMARY_STATUSES: [(Status, &str); 5] =
    [(Status::Pass, "Pass"), (Status::Fail, "Fail"), (Status::Warn, "Warn"), (Status::Error, "Error"), (Status::Skip, "Skip")];

/// Per-report status counts: `{namespace, name, status}`, or `{name, status}` for cluster reports.
pub struct SummaryMetricsListener {
    scope: Scope,
    gauge: Arc<dyn GaugeBackend>,
    reports: ReportFilter,
    cache: GaugeCache,
}

impl SummaryMetricsListener {
    pub fn new(scope: Scope, gauge: Arc<dyn GaugeBackend>, reports: ReportFilter) -> Self {
        Self { scope, gauge, reports, cache: GaugeCache::new() }
    }

    pub fn label_names(scope: Scope) -> Vec<String> {
        let names: &[&str] = match scope {
            Scope::Namespaced => &["namespace", "name", "status"],
            Scope::Cluster => &["name", "status"],
        };
        names.iter().map(|s| s.to_string()).collect()
    }

    fn items(&self, report: &Report) -> Vec<CacheItem> {
        SUMMARY_STATUSES
            .iter()
            .map(|(status, title)| {
                let mut labels = Labels::new();
                if self.scope == Scope::Namespaced {
                    labels.insert("namespace".into(), report.namespace.clone());
                }
                labels.insert("name".into(), report.name.clone());
                labels.insert("status".into(), title.to_string());
                CacheItem { labels, value: report.summary.count(*status) as f64 }
            })
            .collect()
    }

    pub fn handle(&self, event: &LifecycleEvent) {
        let report = &event.report;
        if !self.scope.accepts(report) || !self.reports.validate(report) {
            return;
        }
        let gauge = self.gauge.as_ref();
        if event.kind == EventKind::Deleted {
            for item in self.cache.take(&report.id) {
                gauge.remove(&item.labels);
            }
            return;
        }
        let next = self.items(report);
        let prev = self.cache.replace(&report.id, next.clone());
        remove_stale(gauge, &prev, &next);
        for item in &next {
            gauge.set(&item.labels, item.value);
        }
    }
}

#[async_trait::async_trait]
impl ReportListener for SummaryMetricsListener {
    async fn on_event(&self, event: &LifecycleEvent) {
        self.handle(event)
    }
}
