//! # Buttonbox Bridge
//!
//! BLE dashboard to CAN bus bridge.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load the TOML configuration (first argument, default `config/default.toml`)
//!    - Set up logging with tracing subscriber
//!    - Open the SLCAN adapter and the BLE peripheral
//!
//! 2. **Main Loop**
//!    - Apply queued BLE writes and connection changes
//!    - Drain received CAN frames and notify completed batches
//!    - Handle Ctrl+C for graceful shutdown
//!
//! Expected output:
//! ```text
//! INFO buttonbox_bridge::slcan: CAN initialized at 500kbps on /dev/ttyACM0
//! INFO buttonbox_bridge::ble::bluez: BLE advertising as "ESP32 Dashboard"
//! INFO buttonbox_bridge: Setup complete - BLE Dashboard ready
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use buttonbox_bridge::ble::bluez::BluezPeripheral;
use buttonbox_bridge::ble::event_queue;
use buttonbox_bridge::bridge::{Bridge, BridgeSettings};
use buttonbox_bridge::config::{Config, LoggingConfig};
use buttonbox_bridge::slcan::SlcanBus;

/// Config file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

fn load_config(path: &str) -> Result<(Config, bool)> {
    if !Path::new(path).exists() {
        return Ok((Config::default(), false));
    }
    let config = Config::load(path).with_context(|| format!("Failed to load {}", path))?;
    Ok((config, true))
}

/// Install the fmt subscriber, adding a daily rolling file when `log_dir` is set
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "buttonbox-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let (config, found) = load_config(&config_path)?;

    let _log_guard = init_logging(&config.logging);
    info!("Buttonbox Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    if found {
        info!("Loaded configuration from {}", config_path);
    } else {
        warn!("Config file {} not found, using defaults", config_path);
    }

    let bus = SlcanBus::open_with_paths(&[config.serial.port.as_str()], config.serial.baud_rate, config.can.bitrate)
        .await
        .context("Failed to initialize CAN")?;

    let (events, inbound) = event_queue(config.bridge.event_queue_capacity);
    let link = BluezPeripheral::start(&config.ble.device_name, events)
        .await
        .context("Failed to start BLE peripheral")?;

    let mut bridge = Bridge::new(bus, link, inbound, BridgeSettings::from_config(&config));
    info!("Setup complete - BLE Dashboard ready");
    info!("Press Ctrl+C to exit");

    bridge
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await;

    Ok(())
}
