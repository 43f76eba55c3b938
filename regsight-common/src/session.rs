use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

fn insert(config: &mut zenoh::Config, key: &str, value: &str) -> Result<()> {
    config
        .insert_json5(key, value)
        .map_err(|e| Error::Config(format!("Failed to set zenoh '{}': {}", key, e)))
}

fn endpoints(list: &[String]) -> Result<String> {
    serde_json::to_string(list)
        .map_err(|e| Error::Config(format!("Failed to serialize endpoints: {}", e)))
}

/// Open a Zenoh session for publishing sensor reports.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let mut zenoh_config = zenoh::Config::default();

    insert(&mut zenoh_config, "mode", &format!("\"{}\"", config.mode))?;

    if !config.connect.is_empty() {
        insert(
            &mut zenoh_config,
            "connect/endpoints",
            &endpoints(&config.connect)?,
        )?;
    }

    if !config.listen.is_empty() {
        insert(
            &mut zenoh_config,
            "listen/endpoints",
            &endpoints(&config.listen)?,
        )?;
    }

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}
