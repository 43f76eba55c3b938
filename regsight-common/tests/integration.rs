//! Integration tests for regsight-common library.

use std::collections::HashMap;
use regsight_common::{
    BaseConfig, Format, KeyExprBuilder, SensorReport, SensorValue, decode, decode_auto, encode,
    parse_config,
};

#[test]
fn test_full_report_workflow() {
    let report = SensorReport::new("plant", "flow_rate", Some("12.50".into()), true)
        .with_label("unit", "m3/h")
        .with_label("address", "30001");

    let json_bytes = encode(&report, Format::Json).expect("JSON encode failed");
    let decoded: SensorReport = decode(&json_bytes, Format::Json).expect("JSON decode failed");
    assert_eq!(decoded.hub, "plant");
    assert_eq!(decoded.sensor, "flow_rate");
    assert_eq!(decoded.value, Some(SensorValue::Text("12.50".to_string())));
    assert_eq!(decoded.labels.get("unit"), Some(&"m3/h".to_string()));

    let cbor_bytes = encode(&report, Format::Cbor).expect("CBOR encode failed");
    assert!(
        cbor_bytes.len() < json_bytes.len(),
        "CBOR should be smaller than JSON"
    );

    let auto_decoded: SensorReport = decode_auto(&cbor_bytes).expect("Auto decode failed");
    assert_eq!(auto_decoded.sensor, decoded.sensor);
    assert_eq!(auto_decoded.value, decoded.value);
}

#[test]
fn test_key_expression_building_and_parsing() {
    let builder = KeyExprBuilder::default();
    let key = builder.sensor("boiler-room", "return_temp");

    assert_eq!(key, "regsight/modbus/boiler-room/return_temp");

    let parsed = builder.parse(&key).expect("Parse failed");
    assert_eq!(parsed.hub, "boiler-room");
    assert_eq!(parsed.sensor, "return_temp");
}

#[test]
fn test_special_characters_in_names() {
    let builder = KeyExprBuilder::new("site42/modbus");
    let names = ["meter-01", "pump_02", "tank.level", "192.168.1.1"];

    for name in names {
        let key = builder.sensor("hub", name);
        let parsed = builder.parse(&key).unwrap();
        assert_eq!(parsed.sensor, name);
    }
}

#[test]
fn test_report_without_value() {
    let report = SensorReport::new("plant", "never_polled", None, true);

    let encoded = encode(&report, Format::Json).unwrap();
    let decoded: SensorReport = decode(&encoded, Format::Json).unwrap();
    assert_eq!(decoded.value, None);
    assert!(decoded.labels.is_empty());
}

#[test]
fn test_report_with_many_labels() {
    let mut labels = HashMap::new();
    for i in 0..50 {
        labels.insert(format!("key_{}", i), format!("value_{}", i));
    }

    let report = SensorReport::new("hub", "sensor", Some(false.into()), false)
        .with_labels(labels.clone());

    let encoded = encode(&report, Format::Cbor).unwrap();
    let decoded: SensorReport = decode(&encoded, Format::Cbor).unwrap();
    assert_eq!(decoded.labels.len(), 50);
    assert_eq!(decoded.value, Some(SensorValue::Flag(false)));

    for (k, v) in &labels {
        assert_eq!(decoded.labels.get(k), Some(v));
    }
}

#[test]
fn test_base_config_with_extra_sections() {
    // Unknown top-level sections belong to the bridge config and are ignored here.
    let config: BaseConfig = parse_config(
        r#"{
            serialization: "cbor",
            modbus: { hubs: [] },
        }"#,
    )
    .unwrap();

    assert_eq!(config.serialization, Format::Cbor);
}
