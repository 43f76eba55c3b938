//! End-to-end tests with Zenoh pub/sub.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses its own key
//! prefix so concurrently running tests do not see each other's samples.

use std::time::Duration;
use regsight_common::{
    Format, KeyExprBuilder, SensorReport, SensorValue, ZenohConfig, connect, decode_auto, encode,
};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}/modbus", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_report_reaches_hub_subscriber() {
    let keys = KeyExprBuilder::new(unique_prefix());

    let session = connect(&ZenohConfig::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(keys.hub_wildcard("plant"))
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = SensorReport::new("plant", "inlet_temp", Some("18.4".into()), true);
    let encoded = encode(&report, Format::Cbor).expect("Failed to encode");

    session
        .put(keys.sensor("plant", "inlet_temp"), encoded)
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for report")
        .expect("Failed to receive report");

    let parsed = keys
        .parse(received.key_expr().as_str())
        .expect("Unexpected key");
    assert_eq!(parsed.hub, "plant");
    assert_eq!(parsed.sensor, "inlet_temp");

    let payload = received.payload().to_bytes();
    let decoded: SensorReport = decode_auto(&payload).expect("Failed to decode");
    assert_eq!(decoded.value, Some(SensorValue::Text("18.4".to_string())));
    assert!(decoded.available);

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
