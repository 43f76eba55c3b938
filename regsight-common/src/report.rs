use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The decoded value a sensor currently holds.
///
/// Register sensors always produce text (numbers are already formatted with
/// the configured precision), bit sensors produce a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    /// Formatted register value.
    Text(String),

    /// Single bit taken from a register block.
    Flag(bool),
}

impl SensorValue {
    /// Return the text if this is a register value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SensorValue::Text(s) => Some(s),
            SensorValue::Flag(_) => None,
        }
    }

    /// Return the flag if this is a bit value.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            SensorValue::Flag(b) => Some(*b),
            SensorValue::Text(_) => None,
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Text(s) => f.write_str(s),
            SensorValue::Flag(true) => f.write_str("on"),
            SensorValue::Flag(false) => f.write_str("off"),
        }
    }
}

impl From<String> for SensorValue {
    fn from(v: String) -> Self {
        SensorValue::Text(v)
    }
}

impl From<&str> for SensorValue {
    fn from(v: &str) -> Self {
        SensorValue::Text(v.to_string())
    }
}

impl From<bool> for SensorValue {
    fn from(v: bool) -> Self {
        SensorValue::Flag(v)
    }
}

/// Snapshot of one sensor published after a poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReport {
    /// Unix epoch milliseconds when the poll finished.
    pub timestamp: i64,

    /// Hub the sensor reads through.
    pub hub: String,

    /// Sensor name.
    pub sensor: String,

    /// Last known value; stale when `available` is false.
    pub value: Option<SensorValue>,

    /// Whether the last poll succeeded.
    pub available: bool,

    /// Static metadata (unit, device class, address).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl SensorReport {
    /// Create a new report with the current timestamp.
    pub fn new(
        hub: impl Into<String>,
        sensor: impl Into<String>,
        value: Option<SensorValue>,
        available: bool,
    ) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            hub: hub.into(),
            sensor: sensor.into(),
            value,
            available,
            labels: HashMap::new(),
        }
    }

    /// Add a label to this report.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add multiple labels to this report.
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
