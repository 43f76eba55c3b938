//! Modbus sensor bridge.
//!
//! Polls register sensors on Modbus hubs and publishes their decoded values
//! to Zenoh.

use anyhow::{Context, Result};
use clap::Parser;
use regsight_bridge::config::ModbusBridgeConfig;
use regsight_bridge::poller::SensorPoller;
use regsight_bridge::setup::build_sensors;
use regsight_bridge::transport::HubRegistry;
use regsight_common::KeyExprBuilder;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Modbus register sensor bridge.
#[derive(Parser, Debug)]
#[command(name = "regsight-bridge")]
#[command(about = "Polls Modbus register sensors and publishes them to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "modbus.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration, list the sensors and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ModbusBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = config
        .logging
        .clone()
        .with_level_override(args.log_level.as_deref());
    regsight_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting regsight-bridge");
    info!("Loaded configuration from {:?}", args.config);

    let registry = HubRegistry::from_config(&config.modbus.hubs);
    let active = build_sensors(&config.modbus, &registry);

    if args.check {
        for sensor in &active.sensors {
            println!("ok       {} [{}]", sensor.configured(), sensor.hub_name());
        }
        for rejected in &active.rejected {
            println!("rejected {}", rejected);
        }
        if active.rejected.is_empty() {
            return Ok(());
        }
        anyhow::bail!("{} sensor(s) rejected", active.rejected.len());
    }

    if active.is_empty() {
        anyhow::bail!("No usable sensors in {:?}", args.config);
    }

    info!("Connecting to Zenoh...");
    let session = regsight_common::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;
    info!("Connected to Zenoh");

    let keys = KeyExprBuilder::new(config.modbus.key_prefix.clone());
    let format = config.serialization;

    let sensor_names: Vec<String> = active
        .sensors
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    let hub_names: Vec<&str> = registry.names().collect();

    let mut tasks = Vec::new();
    for sensor in active.sensors {
        let poller = SensorPoller::new(sensor, config.modbus.publish_unchanged);
        let session = session.clone();
        let keys = keys.clone();

        tasks.push(tokio::spawn(async move {
            poller.run(session, keys, format).await;
        }));
    }

    info!(
        "Modbus bridge running with {} sensor(s) on {} hub(s)",
        tasks.len(),
        hub_names.len()
    );
    if !active.rejected.is_empty() {
        warn!("{} sensor(s) skipped due to configuration errors", active.rejected.len());
    }

    let status_key = keys.status_key();
    let status = serde_json::json!({
        "bridge": "modbus",
        "version": env!("CARGO_PKG_VERSION"),
        "hubs": hub_names,
        "sensors": sensor_names,
        "rejected": active.rejected.len(),
        "started_at": chrono::Utc::now().to_rfc3339(),
        "status": "running"
    });

    if let Err(e) = session.put(&status_key, status.to_string()).await {
        error!("Failed to publish bridge status: {}", e);
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    for task in tasks {
        task.abort();
    }

    let status = serde_json::json!({
        "bridge": "modbus",
        "status": "offline"
    });
    let _ = session.put(&status_key, status.to_string()).await;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("Modbus bridge stopped");

    Ok(())
}
