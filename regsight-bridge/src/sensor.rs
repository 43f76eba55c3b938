//! Sensor entities: what to read, how to decode it, and the last result.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use regsight_common::{SensorReport, SensorValue};

use crate::bits::{extract_bit, validate_bit};
use crate::config::{BitSensorConfig, ConfigError, RegisterSensorConfig};
use crate::decode::{DecodeError, ValueDecoder};
use crate::structure::resolve;
use crate::transport::{ReadRequest, RegisterReader};

/// Something that can be polled: a fixed read request and a decoder for its result.
pub trait PollableSensor {
    fn name(&self) -> &str;

    /// The block this sensor reads every poll.
    fn request(&self) -> &ReadRequest;

    /// Turn a block of `request().count` words into a value.
    fn decode(&self, words: &[u16]) -> Result<SensorValue, DecodeError>;
}

/// Numeric, string or custom-structure sensor.
#[derive(Debug, Clone)]
pub struct RegisterSensor {
    name: String,
    request: ReadRequest,
    decoder: ValueDecoder,
}

impl RegisterSensor {
    /// Resolve the sensor's structure; fails if it cannot cover exactly `count` registers.
    pub fn configure(config: &RegisterSensorConfig) -> Result<Self, ConfigError> {
        let format = resolve(
            &config.name,
            config.data_type,
            config.count,
            config.structure.as_deref(),
        )?;

        Ok(Self {
            name: config.name.clone(),
            request: ReadRequest {
                slave: config.slave,
                register_type: config.input_type,
                address: config.address,
                count: config.count,
            },
            decoder: ValueDecoder::new(
                format,
                config.data_type,
                config.reverse_order,
                config.scale,
                config.offset,
                config.precision,
            ),
        })
    }

    pub fn decoder(&self) -> &ValueDecoder {
        &self.decoder
    }
}

impl PollableSensor for RegisterSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn request(&self) -> &ReadRequest {
        &self.request
    }

    fn decode(&self, words: &[u16]) -> Result<SensorValue, DecodeError> {
        self.decoder.decode(words).map(SensorValue::Text)
    }
}

/// Sensor reporting a single bit of its register block.
#[derive(Debug, Clone)]
pub struct BitSensor {
    name: String,
    request: ReadRequest,
    bit: u32,
}

impl BitSensor {
    pub fn configure(config: &BitSensorConfig) -> Result<Self, ConfigError> {
        validate_bit(&config.name, config.bit_number, config.count)?;

        Ok(Self {
            name: config.name.clone(),
            request: ReadRequest {
                slave: config.slave,
                register_type: config.input_type,
                address: config.address,
                count: config.count,
            },
            bit: config.bit_number,
        })
    }

    pub fn bit(&self) -> u32 {
        self.bit
    }
}

impl PollableSensor for BitSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn request(&self) -> &ReadRequest {
        &self.request
    }

    fn decode(&self, words: &[u16]) -> Result<SensorValue, DecodeError> {
        let expected = usize::from(self.request.count);
        if words.len() < expected {
            return Err(DecodeError::Length {
                expected: expected * 2,
                actual: words.len() * 2,
            });
        }
        Ok(SensorValue::Flag(extract_bit(words, self.bit)))
    }
}

/// A sensor of either kind, chosen when the configuration is read.
#[derive(Debug, Clone)]
pub enum ConfiguredSensor {
    Register(RegisterSensor),
    Bit(BitSensor),
}

impl PollableSensor for ConfiguredSensor {
    fn name(&self) -> &str {
        match self {
            ConfiguredSensor::Register(s) => s.name(),
            ConfiguredSensor::Bit(s) => s.name(),
        }
    }

    fn request(&self) -> &ReadRequest {
        match self {
            ConfiguredSensor::Register(s) => s.request(),
            ConfiguredSensor::Bit(s) => s.request(),
        }
    }

    fn decode(&self, words: &[u16]) -> Result<SensorValue, DecodeError> {
        match self {
            ConfiguredSensor::Register(s) => s.decode(words),
            ConfiguredSensor::Bit(s) => s.decode(words),
        }
    }
}

impl From<RegisterSensor> for ConfiguredSensor {
    fn from(s: RegisterSensor) -> Self {
        ConfiguredSensor::Register(s)
    }
}

impl From<BitSensor> for ConfiguredSensor {
    fn from(s: BitSensor) -> Self {
        ConfiguredSensor::Bit(s)
    }
}

impl fmt::Display for ConfiguredSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let req = self.request();
        write!(
            f,
            "{} @ {} {} x{}",
            self.name(),
            req.register_type,
            req.address,
            req.count
        )?;
        match self {
            ConfiguredSensor::Register(s) => {
                write!(f, ", structure '{}'", s.decoder().format().format())
            }
            ConfiguredSensor::Bit(s) => write!(f, ", bit {}", s.bit()),
        }
    }
}

/// Last known value and availability.
///
/// Starts available with no value; a failed read marks it unavailable and
/// keeps the previous value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorState {
    pub value: Option<SensorValue>,
    pub available: bool,
}

impl Default for SensorState {
    fn default() -> Self {
        Self {
            value: None,
            available: true,
        }
    }
}

/// A configured sensor bound to the hub it reads through.
pub struct Sensor<R> {
    inner: ConfiguredSensor,
    hub_name: String,
    hub: Arc<R>,
    state: SensorState,
    scan_interval: Duration,
    labels: HashMap<String, String>,
}

impl<R: RegisterReader> Sensor<R> {
    pub fn new(inner: impl Into<ConfiguredSensor>, hub_name: impl Into<String>, hub: Arc<R>) -> Self {
        Self {
            inner: inner.into(),
            hub_name: hub_name.into(),
            hub,
            state: SensorState::default(),
            scan_interval: Duration::from_secs(15),
            labels: HashMap::new(),
        }
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn hub_name(&self) -> &str {
        &self.hub_name
    }

    pub fn configured(&self) -> &ConfiguredSensor {
        &self.inner
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn state(&self) -> &SensorState {
        &self.state
    }

    pub fn current_value(&self) -> Option<&SensorValue> {
        self.state.value.as_ref()
    }

    pub fn is_available(&self) -> bool {
        self.state.available
    }

    /// Read the sensor's block once and update the state.
    ///
    /// A failed read only marks the sensor unavailable. An error is returned
    /// only when a block that was read cannot be decoded; the state is then
    /// left as it was.
    pub async fn poll(&mut self) -> Result<(), DecodeError> {
        let words = match self.hub.read_registers(self.inner.request()).await {
            Ok(words) => words,
            Err(e) => {
                if self.state.available {
                    warn!(sensor = %self.name(), hub = %self.hub_name, "Sensor unavailable: {}", e);
                } else {
                    debug!(sensor = %self.name(), "Still unavailable: {}", e);
                }
                self.state.available = false;
                return Ok(());
            }
        };

        let value = self.inner.decode(&words)?;

        if !self.state.available {
            info!(sensor = %self.name(), hub = %self.hub_name, "Sensor available again");
        }
        debug!(sensor = %self.name(), value = %value, "Polled");

        self.state.value = Some(value);
        self.state.available = true;
        Ok(())
    }

    /// Snapshot of the current state for publishing.
    pub fn report(&self) -> SensorReport {
        SensorReport::new(
            self.hub_name.clone(),
            self.name(),
            self.state.value.clone(),
            self.state.available,
        )
        .with_labels(self.labels.clone())
    }
}
