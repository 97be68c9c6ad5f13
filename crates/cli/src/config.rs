use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use polwatch_kubehub::{SourceFilter, SourceValidation};
use polwatch_metrics::MetricsConfig;
use polwatch_recondition::{IdGenerator, Reconditioner};
use serde::{Deserialize, Serialize};

/// Result-cache settings. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub keep: u64,
    pub keep_report: u64,
    /// Redis server shared between replicas, e.g. `redis://cache:6379/0`. Wins over `shared_path`.
    pub redis_url: Option<String>,
    /// SQLite file shared by processes on one node.
    pub shared_path: Option<String>,
    pub prefix: String,
}

/// Where delivered result ids are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Sqlite(String),
    Redis(String),
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            keep: 6 * 60 * 60,
            keep_report: 10 * 60,
            redis_url: None,
            shared_path: None,
            prefix: "polwatch".to_string(),
        }
    }
}

impl CacheSettings {
    pub fn keep(&self) -> Duration {
        Duration::from_secs(self.keep)
    }

    pub fn keep_report(&self) -> Duration {
        Duration::from_secs(self.keep_report)
    }

    pub fn backend(&self) -> CacheBackend {
        match (&self.redis_url, &self.shared_path) {
            (Some(url), _) => CacheBackend::Redis(url.clone()),
            (None, Some(path)) => CacheBackend::Sqlite(path.clone()),
            (None, None) => CacheBackend::Memory,
        }
    }
}

/// Custom result-id composition for reports from the listed sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceIds {
    pub sources: Vec<String>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds an empty update is held before it is let through.
    pub debounce: u64,
    pub workers: usize,
    pub skip_existing_on_startup: bool,
    /// Watch a single namespace; cluster reports are skipped then.
    pub namespace: Option<String>,
    pub cache: CacheSettings,
    pub sources: Vec<SourceIds>,
    /// Intake rules; reports failing any of them are ignored entirely.
    pub source_filters: Vec<SourceValidation>,
    pub metrics: MetricsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debounce: 60,
            workers: 4,
            skip_existing_on_startup: true,
            namespace: None,
            cache: CacheSettings::default(),
            sources: Vec::new(),
            source_filters: Vec::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid with the YAML file when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce)
    }

    pub fn source_filter(&self) -> Result<SourceFilter> {
        SourceFilter::new(&self.source_filters).context("compiling source filters")
    }

    pub fn reconditioner(&self) -> Result<Reconditioner> {
        let mut rec = Reconditioner::new();
        for ids in &self.sources {
            let generator = IdGenerator::from_fields(&ids.fields)
                .with_context(|| format!("id fields for sources {:?}", ids.sources))?;
            for source in &ids.sources {
                rec = rec.with_source(source, generator.clone());
            }
        }
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polwatch_core::{Report, ReportResult};
    use polwatch_metrics::MetricsMode;

    #[test]
    fn empty_file_gives_defaults() {
        let s = Settings::from_yaml("").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.debounce_window(), Duration::from_secs(60));
        assert_eq!(s.cache.keep(), Duration::from_secs(21_600));
        assert_eq!(s.cache.keep_report(), Duration::from_secs(600));
        assert_eq!(s.cache.prefix, "polwatch");
        assert!(s.skip_existing_on_startup);
        assert_eq!(s.cache.backend(), CacheBackend::Memory);
    }

    #[test]
    fn redis_url_wins_over_sqlite_path() {
        let s = Settings::from_yaml("cache:\n  shared_path: /tmp/c.db\n").unwrap();
        assert_eq!(s.cache.backend(), CacheBackend::Sqlite("/tmp/c.db".into()));

        let s = Settings::from_yaml("cache:\n  shared_path: /tmp/c.db\n  redis_url: redis://cache:6379/0\n").unwrap();
        assert_eq!(s.cache.backend(), CacheBackend::Redis("redis://cache:6379/0".into()));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let s = Settings::from_yaml(
            r#"
workers: 8
cache:
  shared_path: /var/lib/polwatch/cache.db
metrics:
  enabled: true
  mode: detailed
  filter:
    namespaces:
      exclude: ["kube-*"]
"#,
        )
        .unwrap();
        assert_eq!(s.workers, 8);
        assert_eq!(s.debounce, 60);
        assert_eq!(s.cache.shared_path.as_deref(), Some("/var/lib/polwatch/cache.db"));
        assert_eq!(s.cache.keep, 21_600);
        assert!(s.metrics.enabled);
        assert_eq!(s.metrics.mode, MetricsMode::Detailed);
        assert_eq!(s.metrics.filter.namespaces.exclude, vec!["kube-*".to_string()]);
    }

    #[test]
    fn source_ids_build_generators() {
        let s = Settings::from_yaml(
            r#"
sources:
  - sources: ["Kyverno"]
    fields: ["policy", "rule", "resource"]
"#,
        )
        .unwrap();
        let rec = s.reconditioner().unwrap();
        assert_ne!(rec.generator_for("kyverno"), &IdGenerator::Default);
        assert_eq!(rec.generator_for("trivy"), &IdGenerator::Default);

        let mut report = Report::new("polr", "test");
        report.source = "kyverno".into();
        report.results.push(ReportResult { policy: "p".into(), ..Default::default() });
        let prepared = rec.prepare(report);
        assert!(!prepared.results[0].id.is_empty());
    }

    #[test]
    fn source_filters_from_yaml() {
        let s = Settings::from_yaml(
            r#"
source_filters:
  - disable_cluster_reports: true
  - source: kyverno
    kinds:
      exclude: ["Pod", "Job"]
"#,
        )
        .unwrap();
        assert_eq!(s.source_filters.len(), 2);
        assert_eq!(s.source_filters[1].kinds.exclude, vec!["Pod".to_string(), "Job".to_string()]);
        let filter = s.source_filter().unwrap();
        assert!(!filter.validate(&Report::new("cpolr", "")));
        assert!(filter.validate(&Report::new("polr", "test")));
        assert!(Settings::default().source_filter().unwrap().is_empty());
    }

    #[test]
    fn unknown_id_field_is_rejected() {
        let s = Settings::from_yaml("sources:\n  - sources: [x]\n    fields: [nope]\n").unwrap();
        assert!(s.reconditioner().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polwatch.yaml");
        std::fs::write(&path, "debounce: 5\n").unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap().debounce, 5);
        assert!(Settings::load(Some(&dir.path().join("missing.yaml"))).is_err());
        assert_eq!(Settings::load(None).unwrap(), Settings::default());
    }
}
