//! Integration tests for daemon start-up and shutdown behavior.

use sensor_fcgi::config::{Config, SensorKind};
use sensor_fcgi::daemon;
use sensor_fcgi::error::SensorError;
use sensor_fcgi::fastcgi::FastCgiClient;
use sensor_fcgi::shutdown::Shutdown;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Helper to create a configuration with the socket inside `dir`.
fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.server.socket_path = dir.join("sensorsocket");
    config.sensor.interval_ms = Some(10);
    config.sensor.buffer_size = Some(5);
    config
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket {} never appeared", path.display());
}

#[tokio::test]
async fn test_fake_sensor_daemon_serves_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let socket = config.server.socket_path.clone();

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(daemon::run(config, shutdown.clone()));
    wait_for_socket(&socket).await;

    // let the buffer fill up
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = FastCgiClient::new(&socket).get().await.unwrap();
    let json: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(json["values"].as_array().map(Vec::len), Some(5));
    assert_eq!(json["sensor"], "fake");
    assert_eq!(json["fs"], 100.0);
    for v in json["values"].as_array().unwrap() {
        let v = v.as_f64().unwrap();
        assert!((15.0..=25.0).contains(&v));
    }

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("shutdown should complete")
        .unwrap()
        .unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_sensor_failure_stops_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("iio");
    std::fs::create_dir(&device).unwrap();
    let raw = device.join("in_voltage0_raw");
    std::fs::write(&raw, "100").unwrap();

    let mut config = test_config(dir.path());
    config.sensor.kind = SensorKind::Iio;
    config.sensor.device = Some(device);
    let socket = config.server.socket_path.clone();

    let handle = tokio::spawn(daemon::run(config, Shutdown::new()));
    wait_for_socket(&socket).await;

    // sensor unplugged
    std::fs::remove_file(&raw).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("daemon should stop on its own")
        .unwrap();
    assert!(matches!(result, Err(SensorError::Sensor(_))));
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_missing_probe_fails_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.sensor.kind = SensorKind::Ds18b20;
    config.sensor.device = Some(dir.path().join("28-000000000000/temperature"));
    let socket = config.server.socket_path.clone();

    let result = daemon::run(config, Shutdown::new()).await;
    assert!(matches!(result, Err(SensorError::Sensor(_))));
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_multiple_shutdown_triggers() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let socket = config.server.socket_path.clone();

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(daemon::run(config, shutdown.clone()));
    wait_for_socket(&socket).await;

    shutdown.trigger();
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
