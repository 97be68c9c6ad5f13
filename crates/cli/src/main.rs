use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use metrics::counter;
use polwatch_cache::{InMemoryCache, ResultCache, SharedCache};
use polwatch_core::{EventKind, LifecycleEvent};
use polwatch_kubehub::{watch_reports, KubeReportSource, QueueConfig, ReportQueue};
use polwatch_listener::{
    CleanupListener, LogTarget, ResultListener, SendResultListener, SendScopeResultsListener, SendSyncResultsListener,
    TargetCollection,
};
use polwatch_metrics::MetricsState;
use polwatch_persist::{KvStore, RedisKv, SqliteKv};
use polwatch_store::{Debouncer, EventPublisher};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;

use config::{CacheBackend, CacheSettings, Settings};

const SWEEP_EVERY: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "polwatchctl", version, about = "Policy report watcher")]
struct Cli {
    /// YAML settings file
    #[arg(short = 'c', long = "config", global = true, env = "POLWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds an empty report update is held back
    #[arg(long = "debounce-secs", global = true)]
    debounce_secs: Option<u64>,

    /// Report queue workers
    #[arg(long = "workers", global = true)]
    workers: Option<usize>,

    /// Skip results that existed before startup
    #[arg(long = "skip-existing", global = true)]
    skip_existing: Option<bool>,

    /// Address for the internal metrics exporter, e.g. 0.0.0.0:9102
    #[arg(long = "metrics-addr", global = true, env = "POLWATCH_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// SQLite file for a result cache shared by processes on one node
    #[arg(long = "shared-cache", global = true)]
    shared_cache: Option<String>,

    /// Redis url for a result cache shared between replicas
    #[arg(long = "redis-url", global = true, env = "POLWATCH_REDIS_URL")]
    redis_url: Option<String>,

    /// Kubernetes namespace (default: all namespaces and cluster reports)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch reports in the cluster until Ctrl-C
    Watch {
        /// Print the report gauges on shutdown
        #[arg(long = "print-gauges", action = ArgAction::SetTrue)]
        print_gauges: bool,
    },
    /// Feed recorded lifecycle events through the pipeline and print the report gauges
    Replay {
        /// YAML list of `{type, report}` events
        file: PathBuf,
        /// Debounce window for the replay, in milliseconds
        #[arg(long = "window-ms", default_value_t = 0)]
        window_ms: u64,
    },
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(v) = self.debounce_secs {
            settings.debounce = v;
        }
        if let Some(v) = self.workers {
            settings.workers = v;
        }
        if let Some(v) = self.skip_existing {
            settings.skip_existing_on_startup = v;
        }
        if let Some(v) = &self.shared_cache {
            settings.cache.shared_path = Some(v.clone());
        }
        if let Some(v) = &self.redis_url {
            settings.cache.redis_url = Some(v.clone());
        }
        if let Some(v) = &self.namespace {
            settings.namespace = Some(v.clone());
        }
    }
}

fn init_tracing() {
    let env = std::env::var("POLWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(sock).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        }
    } else {
        warn!(addr = %addr, "invalid metrics address; expected host:port");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    init_metrics(cli.metrics_addr.as_deref());

    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);

    match cli.command {
        Commands::Watch { print_gauges } => watch(settings, print_gauges).await,
        Commands::Replay { ref file, window_ms } => {
            let text = replay_file(file, &settings, Duration::from_millis(window_ms)).await?;
            print!("{}", text);
            Ok(())
        }
    }
}

fn build_cache(cfg: &CacheSettings, cancel: &CancellationToken) -> Result<Arc<dyn ResultCache>> {
    let store: Arc<dyn KvStore> = match cfg.backend() {
        CacheBackend::Memory => {
            let cache = Arc::new(InMemoryCache::new(cfg.keep(), cfg.keep_report()));
            cache.spawn_sweeper(SWEEP_EVERY, cancel.clone());
            return Ok(cache);
        }
        CacheBackend::Sqlite(path) => {
            let store = SqliteKv::open(&path).with_context(|| format!("opening shared cache {}", path))?;
            info!(path = %path, prefix = %cfg.prefix, "sqlite result cache");
            Arc::new(store)
        }
        CacheBackend::Redis(url) => {
            let store = RedisKv::open(&url)?;
            info!(prefix = %cfg.prefix, "redis result cache");
            Arc::new(store)
        }
    };
    let cache = Arc::new(SharedCache::new(store, cfg.prefix.clone(), cfg.keep(), cfg.keep_report()));
    cache.spawn_sweeper(SWEEP_EVERY, cancel.clone());
    Ok(cache)
}

/// Registers result dispatch and target cleanup with the publisher.
fn wire_targets(
    publisher: &EventPublisher,
    cache: Arc<dyn ResultCache>,
    targets: TargetCollection,
    skip_existing: bool,
    started: DateTime<Utc>,
) {
    let skip = skip_existing && targets.skip_existing_on_startup();
    let results = ResultListener::new(cache, skip, started);
    results.add_sync_consumer(Arc::new(SendSyncResultsListener::new(targets.clone())));
    results.add_result_consumer(Arc::new(SendResultListener::new(targets.clone())));
    results.add_scope_consumer(Arc::new(SendScopeResultsListener::new(targets.clone())));
    publisher.register("results", Arc::new(results));
    publisher.register("cleanup", Arc::new(CleanupListener::new(targets)));
}

fn log_targets(skip_existing: bool) -> TargetCollection {
    TargetCollection::new(vec![Arc::new(LogTarget::new("log").with_skip_existing(skip_existing))])
}

async fn watch(settings: Settings, print_gauges: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let started = Utc::now();
    let reconditioner = settings.reconditioner()?;

    let (debouncer, rx) = Debouncer::spawn(settings.debounce_window(), cancel.clone());
    let publisher = Arc::new(EventPublisher::new());
    let cache = build_cache(&settings.cache, &cancel)?;
    wire_targets(
        &publisher,
        cache,
        log_targets(settings.skip_existing_on_startup),
        settings.skip_existing_on_startup,
        started,
    );
    let metrics = if settings.metrics.enabled {
        let state = MetricsState::new(&settings.metrics)?;
        state.register_with(&publisher);
        Some(state)
    } else {
        None
    };

    let source = KubeReportSource::try_default().await.context("connecting to the cluster")?;
    let queue = ReportQueue::new(
        Arc::new(source.clone()),
        reconditioner,
        debouncer.clone(),
        QueueConfig { workers: settings.workers, filter: settings.source_filter()?, ..Default::default() },
    );

    let publisher_task = tokio::spawn({
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        async move { publisher.run(rx, cancel).await }
    });
    let queue_task = tokio::spawn({
        let queue = queue.clone();
        let cancel = cancel.clone();
        async move { queue.run(cancel).await }
    });
    let watch_task = tokio::spawn({
        let cancel = cancel.clone();
        let namespace = settings.namespace.clone();
        async move {
            if let Err(e) = watch_reports(&source, queue, namespace.as_deref(), cancel).await {
                error!(error = ?e, "report watch failed");
            }
        }
    });
    info!(workers = settings.workers, namespace = ?settings.namespace, "polwatch started");

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "waiting for Ctrl-C failed");
    }
    info!("Ctrl-C received; shutting down");
    cancel.cancel();
    debouncer.close();
    for (name, task) in [("watch", watch_task), ("queue", queue_task), ("publisher", publisher_task)] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "task ended abnormally");
        }
    }

    if let (true, Some(state)) = (print_gauges, metrics.as_ref()) {
        print!("{}", state.encode()?);
    }
    Ok(())
}

async fn replay_file(path: &Path, settings: &Settings, window: Duration) -> Result<String> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let events: Vec<LifecycleEvent> =
        serde_yaml::from_str(&text).with_context(|| format!("parsing events in {}", path.display()))?;
    replay(settings, events, window).await
}

/// Runs recorded events through recondition, debounce and every listener, then
/// returns the report gauge exposition.
async fn replay(settings: &Settings, events: Vec<LifecycleEvent>, window: Duration) -> Result<String> {
    let cancel = CancellationToken::new();
    let reconditioner = settings.reconditioner()?;
    let filter = settings.source_filter()?;
    let (debouncer, rx) = Debouncer::spawn(window, cancel.clone());
    let publisher = Arc::new(EventPublisher::new());
    let cache = build_cache(&settings.cache, &cancel)?;
    wire_targets(&publisher, cache, log_targets(false), false, Utc::now());
    let metrics = MetricsState::new(&settings.metrics)?;
    metrics.register_with(&publisher);

    let runner = tokio::spawn({
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        async move { publisher.run(rx, cancel).await }
    });

    counter!("replay_events_total", events.len() as u64);
    for event in events {
        // Deletions carry no content to judge; the queue never filters them either.
        if event.kind != EventKind::Deleted && !filter.validate(&event.report) {
            continue;
        }
        debouncer.add(LifecycleEvent::new(event.kind, reconditioner.prepare(event.report)));
    }
    while debouncer.pending() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Closing ends the channel; the publisher drains what was emitted, then stops.
    debouncer.close();
    runner.await?;
    cancel.cancel();
    Ok(metrics.encode()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polwatch_core::{Report, ReportResult, Status};

    fn report(results: &[(&str, Status)]) -> Report {
        let mut r = Report::new("polr", "test");
        for (policy, status) in results {
            r.results.push(ReportResult { policy: policy.to_string(), status: *status, ..Default::default() });
        }
        r
    }

    #[test]
    fn flags_override_file() {
        let cli = Cli::parse_from([
            "polwatchctl",
            "--debounce-secs",
            "5",
            "--workers",
            "2",
            "--skip-existing",
            "false",
            "--shared-cache",
            "/tmp/c.db",
            "--redis-url",
            "redis://cache:6379/0",
            "watch",
        ]);
        let mut s = Settings::default();
        cli.apply(&mut s);
        assert_eq!(s.debounce, 5);
        assert_eq!(s.workers, 2);
        assert!(!s.skip_existing_on_startup);
        assert_eq!(s.cache.shared_path.as_deref(), Some("/tmp/c.db"));
        assert_eq!(s.cache.backend(), CacheBackend::Redis("redis://cache:6379/0".into()));
    }

    #[tokio::test]
    async fn replay_reports_current_gauges() {
        let events = vec![
            LifecycleEvent::new(EventKind::Added, report(&[("require-labels", Status::Fail)])),
            LifecycleEvent::new(EventKind::Updated, report(&[])),
            LifecycleEvent::new(EventKind::Updated, report(&[("disallow-latest", Status::Warn)])),
        ];
        let text = replay(&Settings::default(), events, Duration::ZERO).await.unwrap();
        assert!(text.contains("disallow-latest"));
        assert!(!text.contains("require-labels"));
    }

    #[tokio::test]
    async fn replay_skips_filtered_reports() {
        let settings = Settings::from_yaml("source_filters:\n  - namespaces:\n      exclude: [\"test\"]\n").unwrap();
        let mut r = report(&[("require-labels", Status::Fail)]);
        r.scope = Some(polwatch_core::Resource { kind: "Pod".into(), namespace: "test".into(), ..Default::default() });
        let events = vec![LifecycleEvent::new(EventKind::Added, r)];
        let text = replay(&settings, events, Duration::ZERO).await.unwrap();
        assert!(!text.contains("require-labels"));
    }

    #[tokio::test]
    async fn replay_of_deleted_report_leaves_no_result_series() {
        let events = vec![
            LifecycleEvent::new(EventKind::Added, report(&[("require-labels", Status::Fail)])),
            LifecycleEvent::new(EventKind::Deleted, Report::tombstone("polr", "test")),
        ];
        let text = replay(&Settings::default(), events, Duration::ZERO).await.unwrap();
        assert!(!text.contains("require-labels"));
    }

    #[tokio::test]
    async fn replay_reads_yaml_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.yaml");
        std::fs::write(
            &path,
            r#"
- type: added
  report:
    name: polr
    namespace: test
    results:
      - policy: require-labels
        result: fail
"#,
        )
        .unwrap();
        let text = replay_file(&path, &Settings::default(), Duration::ZERO).await.unwrap();
        assert!(text.contains("policy=\"require-labels\""));
    }
}
