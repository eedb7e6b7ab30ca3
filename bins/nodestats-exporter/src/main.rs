use anyhow::{bail, Context};
use arc_swap::ArcSwap;
use clap::Parser;
use nodestats_config::ConfigManager;
use nodestats_metrics::{DefinitionRegistry, Metric};
use nodestats_watcher::{
    channel, drain_cycle, Collector, CycleEvent, DrainError, Exporter, ExporterConfig,
    ExpositionFileExporter, LogExporter, MetricEmitter, NamespaceResolver, NodeStatsResolver,
    Observer, PipelineSnapshot, StaticNodeClient, NAMESPACE_CONTEXT, NODE_STATS_CONTEXT,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Node stats exporter
#[derive(Parser, Debug)]
#[command(name = "nodestats-exporter", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "nodestats.toml")]
    config: PathBuf,

    /// Captured info responses to serve as the node
    #[arg(short, long, default_value = "responses.toml")]
    responses: PathBuf,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,

    /// Run a single collection cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        println!("{}", toml::to_string_pretty(&ExporterConfig::default())?);
        return Ok(());
    }

    let manager = if args.config.exists() {
        ConfigManager::<ExporterConfig>::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        ConfigManager::new(ExporterConfig::default())
    };
    let config = manager.get();
    let _guard = nodestats_logging::init_logging(&config.log)?;
    if manager.path().is_none() {
        tracing::info!(config = %args.config.display(), "config file not found, using defaults");
    }

    tracing::info!(
        service = %config.node.service,
        contexts = ?config.node.contexts,
        "Starting node stats exporter"
    );

    let snapshot = ArcSwap::from_pointee(build_snapshot(&config)?);
    let observer = ArcSwap::from_pointee(Observer::from_config(&config.node));

    let client = StaticNodeClient::load(&args.responses)?;
    let collector = build_collector(client, &config.node.contexts)?;

    let (tx, mut rx) = channel(config.channel_capacity);
    let emitter = MetricEmitter::new(tx, config.send_timeout());
    let exporter: Box<dyn Exporter> = match &config.output_path {
        Some(path) => Box::new(ExpositionFileExporter::new(path)),
        None => Box::new(LogExporter),
    };

    let mut ticker = tokio::time::interval(config.scrape_interval());
    let mut hangup = signal(SignalKind::hangup())?;
    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current_snapshot = snapshot.load_full();
                let current_observer = observer.load_full();
                let cycle = Cycle {
                    collector: &collector,
                    snapshot: &current_snapshot,
                    observer: &current_observer,
                    emitter: &emitter,
                    drain_timeout: manager.get().drain_timeout(),
                };
                cycle.run(&mut rx, exporter.as_ref()).await;
                if args.once {
                    break;
                }
            }
            _ = hangup.recv() => {
                tracing::info!("Received SIGHUP, reloading");
                if let Err(e) = reload(&manager, &snapshot, &observer) {
                    tracing::error!(error = %e, "reload failed, keeping current pipeline");
                }
            }
            res = &mut shutdown => {
                res?;
                break;
            }
        }
    }

    for watcher in collector.watchers() {
        let stats = watcher.stats();
        tracing::info!(
            context = watcher.context(),
            cycles = stats.cycles(),
            failed_cycles = stats.failed_cycles(),
            emitted = stats.emitted(),
            filtered = stats.filtered(),
            parse_failures = stats.parse_failures(),
            dropped = stats.dropped(),
            coverage_gaps = stats.coverage_gaps().len(),
            "watcher totals"
        );
    }
    tracing::info!("Node stats exporter shutting down");

    Ok(())
}

fn build_snapshot(config: &ExporterConfig) -> anyhow::Result<PipelineSnapshot> {
    let registry = match &config.definitions_path {
        Some(path) => DefinitionRegistry::load(path)?,
        None => DefinitionRegistry::builtin()?,
    };
    Ok(PipelineSnapshot::new(config, Arc::new(registry))?)
}

fn build_collector(
    client: StaticNodeClient,
    contexts: &[String],
) -> anyhow::Result<Collector<StaticNodeClient>> {
    let mut collector = Collector::new(client);
    for context in contexts {
        collector = match context.as_str() {
            NODE_STATS_CONTEXT => collector.with_resolver(Arc::new(NodeStatsResolver)),
            NAMESPACE_CONTEXT => collector.with_resolver(Arc::new(NamespaceResolver)),
            other => bail!("unknown stat context `{}`", other),
        };
    }
    Ok(collector)
}

/// Re-read the config file and swap in a new pipeline snapshot.
///
/// Channel capacity, stat contexts and the output target are fixed at
/// startup.
fn reload(
    manager: &ConfigManager<ExporterConfig>,
    snapshot: &ArcSwap<PipelineSnapshot>,
    observer: &ArcSwap<Observer>,
) -> anyhow::Result<()> {
    manager.reload()?;
    let config = manager.get();
    snapshot.store(Arc::new(build_snapshot(&config)?));
    observer.store(Arc::new(Observer::from_config(&config.node)));
    tracing::info!(
        path = %manager.path().unwrap_or(Path::new("<defaults>")).display(),
        "pipeline snapshot replaced"
    );
    Ok(())
}

struct Cycle<'a> {
    collector: &'a Collector<StaticNodeClient>,
    snapshot: &'a PipelineSnapshot,
    observer: &'a Observer,
    emitter: &'a MetricEmitter,
    drain_timeout: Duration,
}

impl Cycle<'_> {
    /// Collect every context while draining the channel concurrently, then
    /// export what completed.
    async fn run(&self, rx: &mut mpsc::Receiver<CycleEvent>, exporter: &dyn Exporter) {
        let contexts = self.collector.watchers().len();
        let (results, metrics) = tokio::join!(
            self.collector
                .collect(self.snapshot, self.observer, self.emitter),
            drain_contexts(rx, contexts, self.drain_timeout),
        );

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!(failed, contexts, "some contexts failed this cycle");
        }
        if let Err(e) = exporter.export(&metrics).await {
            tracing::error!(error = %e, "export failed");
        }
    }
}

async fn drain_contexts(
    rx: &mut mpsc::Receiver<CycleEvent>,
    contexts: usize,
    idle_timeout: Duration,
) -> Vec<Metric> {
    let mut metrics = Vec::new();
    for _ in 0..contexts {
        match drain_cycle(rx, idle_timeout).await {
            Ok(cycle) => metrics.extend(cycle.metrics),
            Err(DrainError::Closed) => break,
            Err(e) => tracing::warn!(error = %e, "discarding cycle output"),
        }
    }
    metrics
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("Received CTRL+C");
        }
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
    }
    Ok(())
}
