//! Configuration for the Modbus sensor bridge.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use regsight_common::config::{LoggingConfig, ZenohConfig};
use regsight_common::serialization::Format;

use crate::decode::Number;
use crate::structure::StructError;

/// Name used for hubs and sensor hub references when none is given.
pub const DEFAULT_HUB: &str = "modbus_hub";

/// Configuration errors.
///
/// File-level variants abort startup; the per-sensor variants only exclude
/// the offending sensor from the active set.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Sensor '{name}': unable to detect data type for {count} register(s) of type {kind}, try a custom type")]
    UnsupportedType {
        name: String,
        kind: DataKind,
        count: u16,
    },
    #[error("Sensor '{name}': data type custom requires a structure")]
    MissingStructure { name: String },
    #[error("Sensor '{name}': error in structure '{structure}': {source}")]
    InvalidStructure {
        name: String,
        structure: String,
        #[source]
        source: StructError,
    },
    #[error("Sensor '{name}': structure size ({size} bytes) mismatch registers count ({count} words)")]
    SizeMismatch {
        name: String,
        size: usize,
        count: u16,
    },
    #[error("Sensor '{name}': register count must be at least 1")]
    ZeroCount { name: String },
    #[error("Sensor '{name}': bit number {bit} is out of range for {count} register(s)")]
    BitOutOfRange { name: String, bit: u32, count: u16 },
    #[error("Sensor '{name}': unknown hub '{hub}'")]
    UnknownHub { name: String, hub: String },
    #[error("Sensor '{name}': name already used by another sensor")]
    DuplicateSensor { name: String },
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Encoding of published sensor reports
    #[serde(default)]
    pub serialization: Format,

    /// Modbus hubs and sensors
    pub modbus: ModbusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus hubs and the sensors read through them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Key expression prefix (default: "regsight/modbus")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Publish a report after every successful poll, not only on change
    #[serde(default)]
    pub publish_unchanged: bool,

    /// Transport connections, referenced by name from sensors
    pub hubs: Vec<HubConfig>,

    /// Register sensors (numeric, string or custom structure)
    #[serde(default)]
    pub sensors: Vec<RegisterSensorConfig>,

    /// Single-bit sensors
    #[serde(default)]
    pub bit_sensors: Vec<BitSensorConfig>,
}

fn default_key_prefix() -> String {
    regsight_common::KEY_PREFIX.to_string()
}

/// One Modbus transport connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub name referenced by sensors
    #[serde(default = "default_hub")]
    pub name: String,

    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Unit/slave ID used when a sensor does not set its own
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl HubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_hub() -> String {
    DEFAULT_HUB.to_string()
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU framing tunnelled over a TCP socket
    RtuOverTcp {
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// Modbus register classes a sensor can read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    /// Holding registers (read/write, function code 3)
    #[default]
    Holding,
    /// Input registers (read-only, function code 4)
    Input,
}

impl RegisterType {
    /// Return the string name for this register type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Holding => "holding",
            RegisterType::Input => "input",
        }
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a register sensor's words are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Signed integer sized by the register count (default)
    #[default]
    Int,
    /// Unsigned integer sized by the register count
    Uint,
    /// IEEE 754 float sized by the register count
    Float,
    /// Text, two characters per register
    String,
    /// Explicit `structure` format
    Custom,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Int => "int",
            DataKind::Uint => "uint",
            DataKind::Float => "float",
            DataKind::String => "string",
            DataKind::Custom => "custom",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensor decoded from one or more registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSensorConfig {
    pub name: String,

    /// Hub to read through
    #[serde(default = "default_hub")]
    pub hub: String,

    /// Unit/slave ID, overrides the hub default
    #[serde(default)]
    pub slave: Option<u8>,

    /// First register address (0-based)
    pub address: u16,

    #[serde(default)]
    pub input_type: RegisterType,

    /// Number of registers to read (default: 1)
    #[serde(default = "default_count")]
    pub count: u16,

    #[serde(default)]
    pub data_type: DataKind,

    /// Packed binary format, required for the custom data type
    #[serde(default)]
    pub structure: Option<String>,

    /// Least significant register first
    #[serde(default)]
    pub reverse_order: bool,

    /// Scaling factor (value * scale + offset)
    #[serde(default = "default_scale")]
    pub scale: Number,

    #[serde(default)]
    pub offset: Number,

    /// Digits after the decimal point
    #[serde(default)]
    pub precision: u32,

    #[serde(default)]
    pub unit_of_measurement: Option<String>,

    #[serde(default)]
    pub device_class: Option<String>,

    /// Poll interval in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

/// A sensor reporting one bit of a register block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitSensorConfig {
    pub name: String,

    #[serde(default = "default_hub")]
    pub hub: String,

    #[serde(default)]
    pub slave: Option<u8>,

    pub address: u16,

    #[serde(default)]
    pub input_type: RegisterType,

    #[serde(default = "default_count")]
    pub count: u16,

    /// Bit index across the block; bit 16 is bit 0 of the second register
    pub bit_number: u32,

    #[serde(default)]
    pub unit_of_measurement: Option<String>,

    #[serde(default)]
    pub device_class: Option<String>,

    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

fn default_count() -> u16 {
    1
}

fn default_scale() -> Number {
    Number::Int(1)
}

fn default_scan_interval() -> u64 {
    15
}

impl ModbusBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ModbusBridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the parts of the configuration that make the whole file unusable.
    ///
    /// Problems local to a single sensor are reported later, when the sensor
    /// is configured, so the remaining sensors can still run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let modbus = &self.modbus;

        if modbus.hubs.is_empty() {
            return Err(ConfigError::Validation(
                "At least one hub must be configured".to_string(),
            ));
        }

        let mut hub_names = HashSet::new();
        for hub in &modbus.hubs {
            if hub.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Hub name cannot be empty".to_string(),
                ));
            }

            if !hub_names.insert(hub.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Hub '{}' is defined more than once",
                    hub.name
                )));
            }

            if hub.timeout_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "Hub '{}': timeout_ms must be greater than 0",
                    hub.name
                )));
            }

            if let ConnectionConfig::Rtu { parity, .. } = &hub.connection {
                match parity.to_lowercase().as_str() {
                    "none" | "even" | "odd" => {}
                    _ => {
                        return Err(ConfigError::Validation(format!(
                            "Hub '{}': invalid parity '{}' (use none, even, or odd)",
                            hub.name, parity
                        )));
                    }
                }
            }
        }

        if modbus.sensors.is_empty() && modbus.bit_sensors.is_empty() {
            return Err(ConfigError::Validation(
                "At least one sensor or bit sensor must be configured".to_string(),
            ));
        }

        let intervals = modbus
            .sensors
            .iter()
            .map(|s| (&s.name, s.scan_interval_secs))
            .chain(
                modbus
                    .bit_sensors
                    .iter()
                    .map(|s| (&s.name, s.scan_interval_secs)),
            );
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "Sensor '{}': scan_interval_secs must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }
}
