//! # Emon Uplink
//!
//! Relay energy-monitor log intervals to one or more EmonCMS servers.
//!
//! This application follows the device's JSON-lines energy log and posts each
//! interval's averages to every configured `[[uplink]]`, resuming from
//! wherever the server left off.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use emon_uplink::config::Config;
use emon_uplink::datalog::{JsonlLog, LogFollower};
use emon_uplink::http::AsyncHttpRequest;
use emon_uplink::link::AssumeOnline;
use emon_uplink::logging;
use emon_uplink::scheduler::{Scheduler, SystemClock};
use emon_uplink::uplink::{EmonUplink, ServiceControl, UplinkSettings};

/// Configuration file used when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(name = "emon-uplink", version, about = "Post energy-monitor logs to EmonCMS")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

/// Main entry point for Emon Uplink
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load and validate the configuration
///    - Set up logging (console, plus daily files when configured)
///    - Register the log follower and one uplink per `[[uplink]]`
///
/// 2. **Main Loop**
///    - The scheduler steps each service when its deadline arrives
///    - SIGHUP re-initializes every uplink (Unix only)
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C stops every uplink, abandoning in-flight requests
///    - One final pass lets each uplink log that it stopped
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be read or is invalid
/// - An HTTP client cannot be created
/// - Signal handlers cannot be installed
///
/// # Examples
///
/// ```bash
/// cargo run --release -- --config config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO emon_uplink: Emon Uplink v0.1.0 starting...
/// INFO emon_uplink::uplink::service: emoncms: started, url: https://emoncms.org, node: 5, interval: 10s, transport: plain
/// INFO emon_uplink::uplink::service: emoncms: remote reports LastPosted(1700000000), start posting at 1700000010
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let _log_guard = logging::init(&config.logging);
    info!("Emon Uplink v{} starting...", env!("CARGO_PKG_VERSION"));

    let log = Arc::new(JsonlLog::new(&config.datalog.path));
    info!("Following energy log at {}", log.path().display());

    let mut scheduler = Scheduler::new(Box::new(SystemClock));
    scheduler.add(Box::new(LogFollower::new(log.clone(), config.datalog.refresh_interval_s)));
    let controls = build_uplinks(&config, log, &mut scheduler)?;

    #[cfg(unix)]
    reinitialize_on_hangup(controls.clone())?;

    info!("Press Ctrl+C to exit");
    scheduler.run(shutdown_signal()).await;

    for control in &controls {
        control.stop();
    }
    scheduler.drain();

    info!("Emon Uplink stopped");
    Ok(())
}

/// Register one uplink per `[[uplink]]` section
///
/// # Returns
///
/// * `Result<Vec<ServiceControl>>` - Stop/re-initialize handles, in config order
fn build_uplinks(config: &Config, log: Arc<JsonlLog>, scheduler: &mut Scheduler) -> Result<Vec<ServiceControl>> {
    let layout = config.channel_layout();
    let mut controls = Vec::with_capacity(config.uplinks.len());

    for uplink in &config.uplinks {
        let settings = UplinkSettings::from_config(uplink, layout.clone())
            .with_context(|| format!("invalid settings for uplink '{}'", uplink.name))?;
        let request = AsyncHttpRequest::new(Duration::from_millis(uplink.request_timeout_ms))?;

        let service = EmonUplink::new(settings, log.clone(), Box::new(request), Box::new(AssumeOnline));
        controls.push(service.control());
        scheduler.add(Box::new(service));
    }

    Ok(controls)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
fn reinitialize_on_hangup(controls: Vec<ServiceControl>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, re-initializing {} uplinks", controls.len());
            for control in &controls {
                control.reinitialize();
            }
        }
    });
    Ok(())
}
