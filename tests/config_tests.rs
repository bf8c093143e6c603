//! Tests for loading and validating `AppConfig`.

use biogas_iot::config::{AppConfig, SensorSettings};
use biogas_iot::error::IotError;
use biogas_iot::methodology::MethodologyKind;
use biogas_iot::sensors::SensorKind;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Tests that an empty document yields the documented defaults.
#[test]
fn test_defaults() {
    let config = AppConfig::from_json("{}").unwrap();
    assert_eq!(config, AppConfig::default());
    assert_eq!(config.baud_rate, 9600);
    assert_eq!(config.meter_addresses, vec![1, 2, 3]);
    assert_eq!(config.data_dir, PathBuf::from("./static/logs"));
    assert_eq!(config.methodology, MethodologyKind::Methane);
    assert_eq!(config.sensors.len(), 1);
    assert_eq!(config.sensors[0].kind, SensorKind::PowerMeter);

    let poller = config.poller();
    assert_eq!(poller.poll_interval, Duration::from_millis(15_000));
    assert_eq!(poller.watchdog_timeout, Duration::from_millis(1_000));
    assert_eq!(poller.inter_frame_gap, Duration::from_millis(10));
    assert_eq!(config.mint_interval(), Duration::from_millis(15_000));
}

/// Tests a full document with every sensor kind.
#[test]
fn test_full_document() {
    let config = AppConfig::from_json(
        r#"{
            "port": "/dev/ttyAMA0",
            "baudRate": 19200,
            "meterAddresses": [1, 2],
            "collectorUrl": "https://collector.example",
            "methodology": "cookStove",
            "sensors": [
                { "id": 1, "type": "powerMeter", "metricInterval": 30000 },
                { "id": 2, "type": "gps" },
                { "id": 3, "type": "temperature", "isPrimary": true }
            ]
        }"#,
    )
    .unwrap();

    config.validate().unwrap();
    assert_eq!(config.serial().port, "/dev/ttyAMA0");
    assert_eq!(config.serial().baudrate, 19200);
    assert_eq!(config.poller().addresses, vec![1, 2]);
    assert_eq!(config.methodology, MethodologyKind::CookStove);
    assert_eq!(
        config.sensors[0].metric_interval(),
        Duration::from_millis(30_000)
    );
    assert_eq!(config.sensors[1].metric_interval(), Duration::from_millis(1_000));
    assert_eq!(config.sensors[2].metric_interval(), Duration::from_millis(15_000));
    assert_eq!(config.sensors[2].is_primary, Some(true));
}

/// Tests that misspelled keys are rejected instead of silently defaulted.
#[test]
fn test_unknown_key_is_rejected() {
    let err = AppConfig::from_json(r#"{ "baudrate": 9600 }"#).unwrap_err();
    assert!(matches!(err, IotError::Config(_)));

    let err = AppConfig::from_json(r#"{ "sensors": [{ "id": 1, "type": "powerMeter", "rate": 1 }] }"#)
        .unwrap_err();
    assert!(matches!(err, IotError::Config(_)));
}

/// Tests that an unknown sensor type is rejected.
#[test]
fn test_unknown_sensor_type() {
    let err = AppConfig::from_json(r#"{ "sensors": [{ "id": 1, "type": "humidity" }] }"#)
        .unwrap_err();
    assert!(err.to_string().contains("humidity"));
}

fn mock() -> AppConfig {
    AppConfig {
        mock: true,
        ..AppConfig::default()
    }
}

/// Tests the validation rules one by one.
#[test]
fn test_validation_errors() {
    assert!(AppConfig::default().validate().is_err(), "port required");
    mock().validate().unwrap();

    let cases: Vec<(&str, AppConfig)> = vec![
        ("zero baud", AppConfig { baud_rate: 0, ..mock() }),
        ("zero poll", AppConfig { poll_interval: 0, ..mock() }),
        ("zero mint", AppConfig { mint_interval: 0, ..mock() }),
        ("no meters", AppConfig { meter_addresses: vec![], ..mock() }),
        ("four meters", AppConfig { meter_addresses: vec![1, 2, 3, 4], ..mock() }),
        ("broadcast", AppConfig { meter_addresses: vec![0], ..mock() }),
        ("reserved", AppConfig { meter_addresses: vec![0xF8], ..mock() }),
        ("factor", AppConfig { conversion_factor: 0.0, ..mock() }),
        (
            "duplicate ids",
            AppConfig {
                sensors: vec![
                    SensorSettings { id: 1, kind: SensorKind::PowerMeter, metric_interval: None, is_primary: None },
                    SensorSettings { id: 1, kind: SensorKind::Gps, metric_interval: None, is_primary: None },
                ],
                ..mock()
            },
        ),
        (
            "no primary sensor",
            AppConfig {
                methodology: MethodologyKind::CookStove,
                ..mock()
            },
        ),
    ];
    for (name, config) in cases {
        assert!(
            matches!(config.validate(), Err(IotError::Config(_))),
            "{name} should be rejected"
        );
    }
}

/// Tests loading from a file and the per-component data directories.
#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "mock": true, "dataDir": "/var/lib/biogas" }}"#).unwrap();

    let config = AppConfig::load(file.path()).unwrap();
    assert!(config.mock);
    assert_eq!(config.sensor_dir(7), PathBuf::from("/var/lib/biogas/sensors/7"));
    assert_eq!(config.methodology_dir(), PathBuf::from("/var/lib/biogas/method"));

    let missing = AppConfig::load("/nonexistent/biogas.json").unwrap_err();
    assert!(matches!(missing, IotError::Config(_)));
}
