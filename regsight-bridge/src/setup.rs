//! Building the active sensor set from configuration.

use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, info};

use crate::config::{BitSensorConfig, ConfigError, ModbusConfig, RegisterSensorConfig};
use crate::sensor::{BitSensor, ConfiguredSensor, PollableSensor, RegisterSensor, Sensor};
use crate::transport::{HubRegistry, ReadRequest, RegisterReader};

/// Sensors that passed configuration, and the reasons the others did not.
pub struct ActiveSensors<R> {
    pub sensors: Vec<Sensor<R>>,
    pub rejected: Vec<ConfigError>,
}

impl<R> ActiveSensors<R> {
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

/// Static metadata shared by both sensor kinds.
struct Metadata<'a> {
    name: &'a str,
    hub: &'a str,
    unit: Option<&'a str>,
    device_class: Option<&'a str>,
    scan_interval_secs: u64,
}

impl<'a> From<&'a RegisterSensorConfig> for Metadata<'a> {
    fn from(c: &'a RegisterSensorConfig) -> Self {
        Self {
            name: &c.name,
            hub: &c.hub,
            unit: c.unit_of_measurement.as_deref(),
            device_class: c.device_class.as_deref(),
            scan_interval_secs: c.scan_interval_secs,
        }
    }
}

impl<'a> From<&'a BitSensorConfig> for Metadata<'a> {
    fn from(c: &'a BitSensorConfig) -> Self {
        Self {
            name: &c.name,
            hub: &c.hub,
            unit: c.unit_of_measurement.as_deref(),
            device_class: c.device_class.as_deref(),
            scan_interval_secs: c.scan_interval_secs,
        }
    }
}

/// Configure every sensor against the hubs in `registry`.
///
/// A sensor that fails configuration is logged and left out; the rest are
/// unaffected.
pub fn build_sensors<R: RegisterReader>(
    config: &ModbusConfig,
    registry: &HubRegistry<R>,
) -> ActiveSensors<R> {
    let mut active = ActiveSensors {
        sensors: Vec::new(),
        rejected: Vec::new(),
    };
    let mut seen = HashSet::new();

    let register = config
        .sensors
        .iter()
        .map(|c| (Metadata::from(c), RegisterSensor::configure(c).map(ConfiguredSensor::from)));
    let bits = config
        .bit_sensors
        .iter()
        .map(|c| (Metadata::from(c), BitSensor::configure(c).map(ConfiguredSensor::from)));

    for (meta, configured) in register.chain(bits) {
        match bind(meta, configured, registry, &mut seen) {
            Ok(sensor) => active.sensors.push(sensor),
            Err(e) => {
                error!("{}", e);
                active.rejected.push(e);
            }
        }
    }

    info!(
        active = active.sensors.len(),
        rejected = active.rejected.len(),
        "Sensors configured"
    );
    active
}

fn bind<R: RegisterReader>(
    meta: Metadata<'_>,
    configured: Result<ConfiguredSensor, ConfigError>,
    registry: &HubRegistry<R>,
    seen: &mut HashSet<String>,
) -> Result<Sensor<R>, ConfigError> {
    if !seen.insert(meta.name.to_string()) {
        return Err(ConfigError::DuplicateSensor {
            name: meta.name.to_string(),
        });
    }

    let configured = configured?;
    let hub = registry
        .get(meta.hub)
        .ok_or_else(|| ConfigError::UnknownHub {
            name: meta.name.to_string(),
            hub: meta.hub.to_string(),
        })?;

    let labels = request_labels(configured.request());
    let mut sensor = Sensor::new(configured, meta.hub, hub)
        .with_scan_interval(Duration::from_secs(meta.scan_interval_secs));

    for (key, value) in labels {
        sensor = sensor.with_label(key, value);
    }
    if let Some(unit) = meta.unit {
        sensor = sensor.with_label("unit", unit);
    }
    if let Some(class) = meta.device_class {
        sensor = sensor.with_label("device_class", class);
    }

    Ok(sensor)
}

fn request_labels(request: &ReadRequest) -> Vec<(&'static str, String)> {
    let mut labels = vec![
        ("address", request.address.to_string()),
        ("register_type", request.register_type.as_str().to_string()),
    ];
    if let Some(slave) = request.slave {
        labels.push(("slave", slave.to_string()));
    }
    labels
}
