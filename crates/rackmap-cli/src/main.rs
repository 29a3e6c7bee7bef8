//! Rackmap - test rack topology discovery
//!
//! Works out which relay channel powers which device by switching channels
//! off one at a time and watching what disappears, then writes the resulting
//! topology file.

mod config;
mod progress;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rackmap_core::TopologyFile;
use rackmap_discovery::{
    confirm_relays, relay_candidates, CorrelatorConfig, LiveNetProbe, LivePortScan, LiveRackView,
    TopologyCorrelator,
};
use rackmap_relay::{available_cutters, GpioCutter, PowerCutter};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rackmap")]
#[command(about = "Discovers how a test rack is wired and writes its topology file")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/rackmap/rackmap.toml")]
    config: PathBuf,

    /// Write the topology here instead of the configured path
    #[arg(short, long)]
    topology: Option<PathBuf>,

    /// Run discovery and print the topology without writing it
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a default configuration file and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    info!("Rackmap v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::load_config(&args.config)?;
    let correlator_config = config.to_correlator_config();

    let keystrokes = std::fs::read_to_string(&correlator_config.keystrokes_path)
        .with_context(|| {
            format!(
                "reading keystroke script {}",
                correlator_config.keystrokes_path.display()
            )
        })?;

    // Assemble the power channels to eliminate over
    let cutters = gather_cutters(&config, &correlator_config).await?;
    if cutters.is_empty() {
        bail!("no power cutters found, nothing to discover");
    }

    let mut correlator = TopologyCorrelator::new(
        correlator_config.clone(),
        LiveRackView::new(&correlator_config),
        LivePortScan::new(&correlator_config, &keystrokes),
        LiveNetProbe::new(&correlator_config),
    );

    // Run progress goes to stdout alongside the log stream
    let feed = tokio::spawn(progress::stream_progress(correlator.subscribe()));

    // A discovery run switches real hardware off; an interrupt must not
    // leave half-applied results behind
    let records = tokio::select! {
        records = correlator.discover(&cutters) => records?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, discarding partial results");
            return Ok(());
        }
    };

    // Dropping the correlator closes the event channel; the feed drains
    // any buffered events and ends
    drop(correlator);
    let _ = feed.await;

    let topology = TopologyFile::assemble(&records);
    if topology.is_empty() {
        warn!("No device with a known model was found");
    }

    if args.dry_run {
        println!("{}", topology.render());
        info!("Dry run, topology not written");
    } else {
        let path = args
            .topology
            .unwrap_or_else(|| config.topology.path.clone());
        topology
            .to_file(&path)
            .with_context(|| format!("writing topology {}", path.display()))?;
    }

    Ok(())
}

/// Collects every power channel this run will eliminate over: all sockets of
/// every Cleware device, statically configured GPIO lines, and whatever USB
/// relays the auto-detection confirms.
async fn gather_cutters(
    config: &config::Config,
    correlator_config: &CorrelatorConfig,
) -> Result<Vec<Box<dyn PowerCutter>>> {
    let mut cutters: Vec<Box<dyn PowerCutter>> = Vec::new();

    match available_cutters() {
        Ok(devices) => {
            for device in devices {
                for cutter in device.cutters() {
                    cutters.push(Box::new(cutter));
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "Cleware enumeration failed, continuing without");
        }
    }

    for line in &config.gpio_cutters {
        cutters.push(Box::new(GpioCutter::new(line.gpio)));
    }

    let candidates = relay_candidates(&correlator_config.relay_products)?;
    let settle = Duration::from_secs(correlator_config.relay_settle_secs);
    for relay in confirm_relays(candidates, settle).await? {
        cutters.push(Box::new(relay));
    }

    info!(channels = cutters.len(), "Assembled power channels");
    Ok(cutters)
}
