//! End-to-end poll cycle: configuration text to published reports, with a
//! scripted register source standing in for the Modbus hub.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use regsight_bridge::config::{ConfigError, ModbusBridgeConfig};
use regsight_bridge::poller::SensorPoller;
use regsight_bridge::setup::build_sensors;
use regsight_bridge::transport::{HubRegistry, ReadError, ReadRequest, RegisterReader};
use regsight_common::{Format, SensorReport, SensorValue, decode, encode};

/// Answers reads by start address from a per-address queue.
#[derive(Default)]
struct FakeHub {
    script: Mutex<HashMap<u16, VecDeque<Result<Vec<u16>, ReadError>>>>,
}

impl FakeHub {
    fn script(&self, address: u16, responses: Vec<Result<Vec<u16>, ReadError>>) {
        self.script
            .lock()
            .unwrap()
            .insert(address, responses.into_iter().collect());
    }
}

impl RegisterReader for FakeHub {
    async fn read_registers(&self, request: &ReadRequest) -> Result<Vec<u16>, ReadError> {
        self.script
            .lock()
            .unwrap()
            .get_mut(&request.address)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ReadError::Connectivity("no response".to_string())))
    }
}

const CONFIG: &str = r#"{
    modbus: {
        hubs: [ { name: "plant", connection: { type: "tcp", host: "127.0.0.1" } } ],
        sensors: [
            { name: "temperature", hub: "plant", address: 0, scale: 0.1, precision: 1 },
            { name: "energy", hub: "plant", address: 10, count: 2, data_type: "uint" },
            { name: "label", hub: "plant", address: 20, count: 2, data_type: "string" },
            { name: "pair", hub: "plant", address: 30, count: 2,
              data_type: "custom", structure: ">2h" },
            { name: "broken", hub: "plant", address: 40, count: 2,
              data_type: "custom", structure: ">q" },
        ],
        bit_sensors: [
            { name: "pump_running", hub: "plant", address: 50, bit_number: 3 },
        ],
    }
}"#;

fn setup(hub: FakeHub) -> (Vec<SensorPoller<FakeHub>>, Vec<ConfigError>) {
    let config: ModbusBridgeConfig = json5::from_str(CONFIG).unwrap();
    config.validate().unwrap();

    let mut registry = HubRegistry::new();
    registry.insert("plant", hub);

    let active = build_sensors(&config.modbus, &registry);
    let pollers = active
        .sensors
        .into_iter()
        .map(|s| SensorPoller::new(s, config.modbus.publish_unchanged))
        .collect();
    (pollers, active.rejected)
}

async fn poll_all(pollers: &mut [SensorPoller<FakeHub>]) -> Vec<SensorReport> {
    let mut reports = Vec::new();
    for poller in pollers.iter_mut() {
        if let Some(report) = poller.poll_once().await {
            reports.push(report);
        }
    }
    reports
}

fn value_of<'a>(reports: &'a [SensorReport], sensor: &str) -> Option<&'a SensorReport> {
    reports.iter().find(|r| r.sensor == sensor)
}

#[tokio::test]
async fn test_full_cycle() {
    let hub = FakeHub::default();
    hub.script(0, vec![Ok(vec![215]), Ok(vec![215]), Err(ReadError::Connectivity("reset".into()))]);
    hub.script(10, vec![Ok(vec![0x0001, 0x0000])]);
    hub.script(20, vec![Ok(vec![0x4f4b, 0x2121])]);
    hub.script(30, vec![Ok(vec![0xffff, 0x0002])]);
    hub.script(50, vec![Ok(vec![0x0008])]);

    let (mut pollers, rejected) = setup(hub);

    assert_eq!(rejected.len(), 1);
    assert!(matches!(
        &rejected[0],
        ConfigError::SizeMismatch { name, size: 8, count: 2 } if name == "broken"
    ));
    assert_eq!(pollers.len(), 5);

    // First cycle: every sensor moves off its initial state.
    let reports = poll_all(&mut pollers).await;
    assert_eq!(reports.len(), 5);

    let expect = [
        ("temperature", SensorValue::from("21.5")),
        ("energy", SensorValue::from("65536")),
        ("label", SensorValue::from("OK!!")),
        ("pair", SensorValue::from("-1,2")),
        ("pump_running", SensorValue::from(true)),
    ];
    for (sensor, value) in expect {
        let report = value_of(&reports, sensor).unwrap();
        assert_eq!(report.hub, "plant");
        assert_eq!(report.value.as_ref(), Some(&value), "{sensor}");
        assert!(report.available);
    }

    // Second cycle: temperature is unchanged, the rest lose their link.
    let reports = poll_all(&mut pollers).await;
    assert!(value_of(&reports, "temperature").is_none());

    let energy = value_of(&reports, "energy").unwrap();
    assert!(!energy.available);
    assert_eq!(energy.value, Some(SensorValue::from("65536")));

    // Third cycle: temperature goes offline but keeps its last value.
    let reports = poll_all(&mut pollers).await;
    let temperature = value_of(&reports, "temperature").unwrap();
    assert!(!temperature.available);
    assert_eq!(temperature.value, Some(SensorValue::from("21.5")));
    assert!(value_of(&reports, "energy").is_none());
}

#[tokio::test]
async fn test_invalid_text_keeps_previous_value() {
    let hub = FakeHub::default();
    hub.script(20, vec![Ok(vec![0x6869, 0x2020]), Ok(vec![0xff00, 0x0000])]);

    let (mut pollers, _) = setup(hub);
    let label = pollers
        .iter_mut()
        .find(|p| p.sensor().name() == "label")
        .unwrap();

    let report = label.poll_once().await.unwrap();
    assert_eq!(report.value, Some(SensorValue::from("hi  ")));

    assert!(label.poll_once().await.is_none());
    assert_eq!(label.sensor().current_value(), Some(&SensorValue::from("hi  ")));
    assert!(label.sensor().is_available());
}

#[tokio::test]
async fn test_report_wire_format() {
    let hub = FakeHub::default();
    hub.script(50, vec![Ok(vec![0x0000])]);

    let (mut pollers, _) = setup(hub);
    let pump = pollers
        .iter_mut()
        .find(|p| p.sensor().name() == "pump_running")
        .unwrap();
    let report = pump.poll_once().await.unwrap();

    let json = encode(&report, Format::Json).unwrap();
    let text = String::from_utf8(json.clone()).unwrap();
    assert!(text.contains("\"value\":false"));
    assert!(text.contains("\"register_type\":\"holding\""));

    let back: SensorReport = decode(&json, Format::Json).unwrap();
    assert_eq!(back.sensor, "pump_running");
    assert_eq!(back.value, Some(SensorValue::Flag(false)));
    assert_eq!(back.labels.get("address").map(String::as_str), Some("50"));
}
