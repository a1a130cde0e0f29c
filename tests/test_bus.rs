mod common;
use common::*;

use serde_json::json;
use tristar_bridge::tristar::decode;

#[test]
fn round_exact_ties_to_even() {
    assert_eq!(bus::round(2.5, 0), 2.0);
    assert_eq!(bus::round(3.5, 0), 4.0);
    assert_eq!(bus::round(-2.5, 0), -2.0);
    assert_eq!(bus::round(122.5, 0), 122.0);
    assert_eq!(bus::round(1.25, 1), 1.2);
    assert_eq!(bus::round(12.3456, 2), 12.35);
    assert_eq!(bus::round(-0.04, 1), 0.0);
    assert_eq!(bus::round(999.4, 0), 999.0);
}

#[test]
fn round_uses_the_stored_value() {
    // 0.015 is stored just below the half, 2.345 just above
    assert_eq!(bus::round(decode::watt_hours_to_kwh(15), 2), 0.01);
    assert_eq!(bus::round(decode::watt_hours_to_kwh(125), 2), 0.12);
    assert_eq!(bus::round(decode::watt_hours_to_kwh(2345), 2), 2.35);
}

#[test]
fn payload_wraps_value() {
    assert_eq!(bus::Message::new("/Dc/0/Voltage", 12.5).payload(), r#"{"value":12.5}"#);
    assert_eq!(bus::Message::new("/HardwareVersion", "3.1").payload(), r#"{"value":"3.1"}"#);
    assert_eq!(bus::Message::for_connected(false).payload(), r#"{"value":0}"#);
}

#[test]
fn static_paths() {
    let mut controller = Factory::controller_config();
    controller.device_instance = 7;

    let messages = bus::Message::for_static(&controller);

    assert_eq!(messages.len(), 8);
    assert_eq!(value_at(&messages, "/Mgmt/ProcessName"), Some(&json!("tristar-bridge")));
    assert_eq!(value_at(&messages, "/Mgmt/Connection"), Some(&json!("Modbus TCP")));
    assert_eq!(value_at(&messages, "/ProductId"), Some(&json!(43981)));
    assert_eq!(value_at(&messages, "/DeviceInstance"), Some(&json!(7)));
    assert_eq!(value_at(&messages, "/Mode"), Some(&json!(1)));
    assert_eq!(value_at(&messages, "/ErrorCode"), Some(&json!(0)));
    assert_eq!(value_at(&messages, "/History/Overall/DaysAvailable"), Some(&json!(1)));
}

#[tokio::test]
async fn measurement_paths() {
    common_setup();

    let device = FakeDevice::new();
    let mut controller = Controller::new(device);
    let measurements = controller.update().await.unwrap();

    let messages = bus::Message::for_measurements(&measurements);

    assert_eq!(messages.len(), 17);
    let expected = [
        ("/Pv/V", json!(100.0)),
        ("/Pv/I", json!(10.0)),
        ("/Dc/0/Voltage", json!(50.0)),
        ("/Dc/0/Current", json!(20.0)),
        ("/Dc/0/Temperature", json!(-5.0)),
        ("/Yield/Power", json!(1000.0)),
        ("/State", json!(3)),
        ("/History/Daily/0/Yield", json!(2.35)),
        ("/History/Daily/0/MaxPower", json!(1500.0)),
        ("/History/Daily/0/MaxPvVoltage", json!(110.0)),
        ("/History/Daily/0/MaxBatteryVoltage", json!(55.0)),
        ("/History/Daily/0/MinBatteryVoltage", json!(48.0)),
        ("/History/Daily/0/TimeInBulk", json!(0)),
        ("/History/Daily/0/TimeInAbsorption", json!(59)),
        ("/History/Daily/0/TimeInFloat", json!(10)),
        // 122.345 and 4323.345
        ("/Yield/User", json!(122.0)),
        ("/Yield/System", json!(4323.0)),
    ];
    for (path, value) in expected {
        assert_eq!(value_at(&messages, path), Some(&value), "{}", path);
    }
}

#[tokio::test]
async fn identity_paths() {
    common_setup();

    let device = FakeDevice::new();
    let mut controller = Controller::new(device);
    let identity = controller.initialize().await.unwrap();

    let messages = bus::Message::for_identity(identity);

    assert_eq!(
        messages,
        vec![
            bus::Message::new("/ProductName", "TriStar MPPT 60"),
            bus::Message::new("/FirmwareVersion", 1234),
            bus::Message::new("/HardwareVersion", "3.1"),
            bus::Message::new("/Serial", "12345678"),
        ]
    );
}

#[test]
fn topics_are_namespaced() {
    let config = ConfigWrapper::from_config(Factory::config());
    let mqtt = mqtt::Mqtt::new(config, Channels::new());

    let message = bus::Message::new("/Dc/0/Voltage", 12.5);
    assert_eq!(mqtt.topic(&message), "tristar/Dc/0/Voltage");
}

#[test]
fn cache_keeps_first_seen_order() {
    let mut cache = bus::Cache::new();
    assert!(cache.is_empty());

    cache.update(&[
        bus::Message::new("/Pv/V", 100.0),
        bus::Message::new("/Pv/I", 10.0),
    ]);
    cache.update(&[
        bus::Message::new("/Pv/V", 101.5),
        bus::Message::new("/Connected", 1),
    ]);

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get("/Pv/V"), Some(&json!(101.5)));
    let paths: Vec<String> = cache.messages().into_iter().map(|m| m.path).collect();
    assert_eq!(paths, vec!["/Pv/V", "/Pv/I", "/Connected"]);
}
