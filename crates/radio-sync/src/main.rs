mod adapters;
mod http;

use anyhow::Context;
use clap::Parser;
use radio_nowplaying::config::Config;
use radio_nowplaying::cycle::{CycleRunner, DispatchOptions, LatestNowPlaying, Sinks};
use radio_nowplaying::engine::{AggregationEngine, EngineConfig};
use radio_nowplaying::history::TsvHistoryLedger;
use radio_nowplaying::sinks::{
    JsonSnapshotStore, LineFileMetrics, LogMetrics, MemoryCache, MetricsSink,
};
use radio_nowplaying::songs::JsonSongTable;
use radio_nowplaying::station::TomlStationRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "radio-sync", about = "Poll stations and publish now-playing data")]
struct Args {
    /// Config file (defaults to ~/.config/radio-sync/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
    /// Do not start the HTTP API.
    #[arg(long)]
    no_http: bool,
}

fn init_logging(log_path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log file {:?}", log_path))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,radio_sync=debug,radio_nowplaying=debug")
            }),
        )
        .init();
    Ok(())
}

fn build_runner(config: &Config) -> anyhow::Result<CycleRunner> {
    let paths = &config.paths;
    let songs = Arc::new(
        JsonSongTable::open(paths.songs_file()).context("opening song table")?,
    );
    let history = Arc::new(
        TsvHistoryLedger::open(paths.history_file()).context("opening history ledger")?,
    );
    let engine = AggregationEngine::new(
        songs,
        history,
        EngineConfig {
            history_window: config.sync.history_window,
            poll_timeout: config.sync.poll_timeout(),
        },
    );

    let metrics: Arc<dyn MetricsSink> = match &config.metrics.file {
        Some(path) => Arc::new(LineFileMetrics::new(path)),
        None => Arc::new(LogMetrics),
    };
    let sinks = Sinks {
        metrics,
        cache: Arc::new(MemoryCache::new()),
        snapshots: Arc::new(JsonSnapshotStore::new(paths.snapshots_dir())),
    };

    Ok(CycleRunner::new(
        Arc::new(TomlStationRegistry::new(&config.stations.stations_toml)),
        Arc::new(adapters::ConfiguredAdapters::new(config.sync.poll_timeout())?),
        engine,
        sinks,
        DispatchOptions::from_config(config),
    ))
}

/// Run one cycle within `budget`. Returns whether it completed.
async fn run_once(runner: &CycleRunner, latest: &LatestNowPlaying, budget: Duration) -> bool {
    match tokio::time::timeout(budget, runner.run_cycle()).await {
        Ok(Ok(result)) => {
            if result.elapsed() > budget / 2 {
                warn!(
                    "[cycle] took {}ms of a {}s budget",
                    result.elapsed_ms,
                    budget.as_secs()
                );
            }
            latest.publish(result).await;
            true
        }
        Ok(Err(e)) => {
            error!("[cycle] failed: {}", e);
            false
        }
        Err(_) => {
            error!("[cycle] exceeded its {}s budget, abandoned", budget.as_secs());
            false
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (config, config_path) = match &args.config {
        Some(path) => (Config::load_from(path)?, path.clone()),
        None => (Config::load()?, Config::config_path()),
    };

    init_logging(&config.paths.log_file())?;
    info!("Config loaded from: {:?}", config_path);

    if !config.stations.stations_toml.exists() {
        warn!(
            "Station file {:?} does not exist yet; cycles will fail until it does",
            config.stations.stations_toml
        );
    }

    let runner = build_runner(&config)?;
    let latest = LatestNowPlaying::new();
    let budget = config.sync.cycle_budget();

    if args.once {
        if !run_once(&runner, &latest, budget).await {
            anyhow::bail!("cycle did not complete");
        }
        return Ok(());
    }

    if config.http.enabled && !args.no_http {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            latest.clone(),
        );
    }

    let mut ticker = tokio::time::interval(config.sync.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Syncing every {}s (budget {}s)",
        config.sync.interval().as_secs(),
        budget.as_secs()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_once(&runner, &latest, budget).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
