//! # Housekeeper
//!
//! Keeps the validator registry fresh and checks the payload store is
//! reachable.
//!
//! ```bash
//! cargo run --bin housekeeper -- --config Config.toml
//! cargo run --bin housekeeper -- --once   # single refresh, exit status reflects it
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use relay_datastore::{
    metrics,
    payload_cache::PayloadCache,
    refresher::{self, RegistryRefresher},
    settings::Settings,
    validator_registry::ValidatorRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "housekeeper", about = "Validator registry refresher for the relay data tier")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "Config.toml")]
    config: PathBuf,

    /// Refresh once and exit
    #[arg(long)]
    once: bool,
}

#[cfg(feature = "observability")]
fn install_metrics_exporter(settings: &Settings) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    if !settings.metrics.enabled {
        return Ok(());
    }
    let addr: std::net::SocketAddr = settings
        .metrics
        .listen_addr
        .parse()
        .with_context(|| format!("invalid metrics.listen_addr {}", settings.metrics.listen_addr))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    metrics::describe_metrics();
    log::info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

#[cfg(not(feature = "observability"))]
fn install_metrics_exporter(settings: &Settings) -> Result<()> {
    if settings.metrics.enabled {
        log::warn!("metrics.enabled is set but the observability feature is off");
    }
    Ok(())
}

// JSON lines for log and tracing events alike; the subscriber bridges `log` records
#[cfg(feature = "observability")]
fn init_logging(settings: &Settings) {
    let level = settings
        .log
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().json().with_max_level(level).init();
}

// tracing events reach env_logger through tracing's `log` feature
#[cfg(not(feature = "observability"))]
fn init_logging(settings: &Settings) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let settings = Settings::from_path(&args.config)
        .with_context(|| format!("failed to load settings from {}", args.config.display()))?;
    init_logging(&settings);
    log::info!("Settings loaded for network {}", settings.network);

    install_metrics_exporter(&settings)?;

    let cache = PayloadCache::from_settings(&settings).await?;
    log::info!("Payload store {} ready", cache.store_name());

    let registry = Arc::new(ValidatorRegistry::from_settings(&settings)?);

    if args.once {
        return match refresher::run_once(&cache, registry.as_ref()).await {
            Ok(count) => {
                log::info!("Registry holds {} validators", count);
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "Housekeeping pass failed ({}, transient: {}): {}",
                    e.kind(),
                    e.kind().is_transient(),
                    e
                );
                Err(e.into())
            }
        };
    }

    metrics::set_up(1.0);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let every = Duration::from_secs(settings.registry.refresh_interval_seconds);
    let handle = RegistryRefresher::new(registry.clone(), every).spawn(shutdown_rx);

    log::info!("Housekeeper running ({:?} registry, refresh every {:?})", registry.mode(), every);

    signal::ctrl_c().await?;
    log::info!("Shutdown signal received");
    metrics::set_up(0.0);
    shutdown_tx.send(true).ok();
    handle.await.context("refresher task panicked")?;

    Ok(())
}
