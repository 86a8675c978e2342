//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "binary"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Binary entrypoint for the ChargeWatch daemon."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cw_common::config::{AppConfig, StoreBackend};
use cw_common::logging::{init_console, init_tracing};
use cw_common::time::SystemClock;
use cw_core::{encode_text, new_registry, ContinuityMetrics, PresentationAdapter, RefreshLoop};
use cw_persistence::{CsvSeriesStore, MemoryStore, SeriesStore};
use tokio::signal;
use tracing::{info, warn};

mod render;

use render::{ConsoleRenderer, JsonRenderer};

const DEFAULT_CONFIG_PATH: &str = "configs/chargewatch.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "ChargeWatch telemetry continuity daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", global = true, help = "Override the history file")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the refresh loop until interrupted")]
    Run {
        #[arg(long, value_name = "SECS", help = "Seconds between refresh cycles")]
        interval: Option<u64>,
        #[arg(long, value_name = "N", help = "Stop after N cycles")]
        cycles: Option<u64>,
        #[arg(long, help = "Emit one JSON document per cycle")]
        json: bool,
        #[arg(long, help = "Write synthetic backfill to the store")]
        persist: bool,
    },
    #[command(about = "Reconcile once, render the snapshot, and exit")]
    Once {
        #[arg(long, help = "Emit the snapshot as JSON")]
        json: bool,
        #[arg(long, help = "Print Prometheus metrics after the cycle")]
        metrics: bool,
        #[arg(long, help = "Write synthetic backfill to the store")]
        persist: bool,
    },
    #[command(about = "Validate configuration and print the effective settings")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = AppConfig::load_with_override(cli.config.as_deref(), &[DEFAULT_CONFIG_PATH])?;
    let mut config = loaded.config;
    if let Some(path) = cli.store {
        config.store.backend = StoreBackend::Csv;
        config.store.path = path;
    }
    let source = loaded
        .source
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_owned());

    match cli.command.unwrap_or(Commands::Run {
        interval: None,
        cycles: None,
        json: false,
        persist: false,
    }) {
        Commands::Run {
            interval,
            cycles,
            json,
            persist,
        } => {
            if let Some(secs) = interval {
                config.refresh.interval = Duration::from_secs(secs);
            }
            if cycles.is_some() {
                config.refresh.max_cycles = cycles;
            }
            config.store.persist_backfill |= persist;
            config.validate()?;
            init_tracing("cwatchd", &config.logging)?;
            info!(config_source = %source, zones = config.zones.len(), "configuration loaded");
            run_daemon(config, json).await?
        }
        Commands::Once {
            json,
            metrics,
            persist,
        } => {
            init_console();
            config.store.persist_backfill |= persist;
            run_once(config, json, metrics)?
        }
        Commands::CheckConfig => {
            init_console();
            config.validate()?;
            println!("# source: {}", source);
            print!(
                "{}",
                toml::to_string_pretty(&config).context("failed to render configuration")?
            );
        }
    }

    Ok(())
}

fn build_store(config: &AppConfig) -> Result<Arc<dyn SeriesStore>> {
    let store: Arc<dyn SeriesStore> = match config.store.backend {
        StoreBackend::Csv => Arc::new(CsvSeriesStore::new(
            config.store.path.clone(),
            config.clock.offset()?,
        )),
        StoreBackend::Memory => Arc::new(MemoryStore::default()),
    };
    Ok(store)
}

fn build_renderer(config: &AppConfig, json: bool) -> Box<dyn PresentationAdapter> {
    if json {
        Box::new(JsonRenderer)
    } else {
        Box::new(ConsoleRenderer::new(config.zone_names()))
    }
}

async fn run_daemon(config: AppConfig, json: bool) -> Result<()> {
    let store = build_store(&config)?;
    let clock = Arc::new(SystemClock::new(config.clock.offset()?));
    let metrics = ContinuityMetrics::new(new_registry())?;
    let refresh = RefreshLoop::from_config(&config, store, clock, build_renderer(&config, json))?
        .with_metrics(metrics);

    let handle = refresh.spawn();
    let shutdown = handle.shutdown_signal();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received; shutting down");
                let _ = shutdown.send(());
            }
            Err(err) => warn!(error = %err, "unable to listen for ctrl-c"),
        }
    });

    let stats = handle.join().await?;
    info!(
        cycles = stats.cycles,
        generated = stats.generated_records,
        alerts = stats.alerts,
        degraded = stats.degraded_cycles,
        "daemon stopped"
    );
    Ok(())
}

fn run_once(config: AppConfig, json: bool, print_metrics: bool) -> Result<()> {
    let store = build_store(&config)?;
    let clock = Arc::new(SystemClock::new(config.clock.offset()?));
    let metrics = ContinuityMetrics::new(new_registry())?;
    let mut refresh =
        RefreshLoop::from_config(&config, store, clock, build_renderer(&config, json))?
            .with_metrics(metrics.clone());

    let outcome = refresh.run_cycle();
    if outcome.degraded() {
        let labels: Vec<&str> = outcome
            .report
            .conditions
            .iter()
            .map(|condition| condition.as_str())
            .collect();
        warn!(conditions = ?labels, "cycle completed in degraded mode");
    }
    if print_metrics {
        print!("{}", encode_text(&metrics.registry())?);
    }
    Ok(())
}
