//! Per-sensor poll loop and report publishing.

use tracing::{debug, error, info, warn};
use zenoh::Session;
use regsight_common::serialization::{Format, encode};
use regsight_common::{KeyExprBuilder, SensorReport};

use crate::sensor::{Sensor, SensorState};
use crate::transport::RegisterReader;

/// Whether a poll that moved the state from `before` to `after` is worth publishing.
///
/// State changes always are. Unchanged state is published only when asked
/// for and the sensor is available, so an offline sensor is announced once.
pub fn should_publish(before: &SensorState, after: &SensorState, publish_unchanged: bool) -> bool {
    before != after || (publish_unchanged && after.available)
}

/// Polls one sensor on its scan interval.
pub struct SensorPoller<R> {
    sensor: Sensor<R>,
    publish_unchanged: bool,
}

impl<R: RegisterReader> SensorPoller<R> {
    pub fn new(sensor: Sensor<R>, publish_unchanged: bool) -> Self {
        Self {
            sensor,
            publish_unchanged,
        }
    }

    pub fn sensor(&self) -> &Sensor<R> {
        &self.sensor
    }

    /// Poll once; returns the report to publish, if any.
    pub async fn poll_once(&mut self) -> Option<SensorReport> {
        let before = self.sensor.state().clone();

        if let Err(e) = self.sensor.poll().await {
            error!(
                sensor = %self.sensor.name(),
                hub = %self.sensor.hub_name(),
                "Failed to decode register block: {}",
                e
            );
            return None;
        }

        should_publish(&before, self.sensor.state(), self.publish_unchanged)
            .then(|| self.sensor.report())
    }

    /// Run the polling loop, publishing reports under `keys`.
    pub async fn run(mut self, session: Session, keys: KeyExprBuilder, format: Format) {
        let interval = self.sensor.scan_interval();
        let key = keys.sensor(self.sensor.hub_name(), self.sensor.name());

        info!(
            "Starting poller for sensor '{}' on hub '{}' (interval: {}s)",
            self.sensor.name(),
            self.sensor.hub_name(),
            interval.as_secs()
        );

        loop {
            if let Some(report) = self.poll_once().await {
                publish(&session, &key, &report, format).await;
            }

            tokio::time::sleep(interval).await;
        }
    }
}

async fn publish(session: &Session, key: &str, report: &SensorReport, format: Format) {
    match encode(report, format) {
        Ok(payload) => {
            if let Err(e) = session.put(key, payload).await {
                warn!("Failed to publish to '{}': {}", key, e);
            } else {
                debug!(
                    "Published: {} = {:?} (available: {})",
                    key, report.value, report.available
                );
            }
        }
        Err(e) => {
            warn!("Failed to encode sensor report: {}", e);
        }
    }
}
