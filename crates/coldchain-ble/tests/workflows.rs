//! Sequential sensor workflow tests over the scripted transport

use std::time::Duration;

use coldchain_ble::{
    download_logs, download_samples, read_info, setup_new_sensor, ConnectionState, DeviceError,
    DeviceManager, DeviceManagerConfig, ScriptedTransport, SimulatedSensor, TransportCall,
    TransportError,
};
use coldchain_core::{Advertisement, Celsius, DeviceId, Timestamp};
use tokio_test::{assert_err, assert_ok};

fn manager_with(
    sensor: SimulatedSensor,
) -> (ScriptedTransport, DeviceManager<ScriptedTransport>, DeviceId) {
    let transport = ScriptedTransport::new();
    let id = DeviceId::new("c8:4b:2d:10:00:07");
    transport.add_sensor(&id, sensor);
    let config = DeviceManagerConfig::new().with_reply_timeout(Duration::from_millis(100));
    let manager = DeviceManager::new(transport.clone(), config);
    (transport, manager, id)
}

fn advertisement(battery_level: u8) -> Advertisement {
    Advertisement {
        version: 1,
        battery_level,
        log_interval: 300,
        log_count: 0,
        current_temperature: Celsius::from_tenths(45),
    }
}

#[tokio::test]
async fn test_setup_new_sensor() {
    let (transport, manager, id) = manager_with(SimulatedSensor::default());

    let setup = assert_ok!(setup_new_sensor(&manager, &id, 60, Some(&advertisement(76)), 10).await);
    assert_eq!(setup.device_id, id);
    assert_eq!(setup.log_interval, 60);
    assert_eq!(setup.battery_level, Some(76));

    assert_eq!(
        transport.writes(&id),
        vec![b"*lint60".to_vec(), b"*bd".to_vec()]
    );
    let sensor = transport.sensor(&id).unwrap();
    assert_eq!(sensor.log_interval, 60);
    assert!(sensor.logging);

    // Link is released afterwards
    assert_eq!(manager.state(&id).await, ConnectionState::Disconnected);
    assert!(!transport.is_connected(&id));
}

#[tokio::test]
async fn test_setup_without_advertisement_has_no_battery() {
    let (_, manager, id) = manager_with(SimulatedSensor::default());
    let setup = setup_new_sensor(&manager, &id, 300, None, 10).await.unwrap();
    assert_eq!(setup.battery_level, None);
}

#[tokio::test]
async fn test_setup_failure_still_disconnects() {
    let (transport, manager, id) = manager_with(SimulatedSensor::default());
    transport.fail_writes(&id, 3, TransportError::Timeout);

    let err = setup_new_sensor(&manager, &id, 60, None, 3).await.unwrap_err();
    assert!(matches!(err, DeviceError::CommandFailed { attempts: 3, .. }));

    // Logging was never toggled
    assert!(!transport.sensor(&id).unwrap().logging);
    assert_eq!(manager.state(&id).await, ConnectionState::Disconnected);
    assert_eq!(
        transport.calls().last(),
        Some(&TransportCall::Disconnect(id.clone()))
    );
}

#[tokio::test]
async fn test_setup_connect_failure_is_returned() {
    let (transport, manager, id) = manager_with(SimulatedSensor::default());
    transport.fail_connects(&id, 1);

    let err = assert_err!(setup_new_sensor(&manager, &id, 60, None, 10).await);
    assert!(matches!(err, DeviceError::ConnectionFailed { .. }));
    assert_eq!(transport.write_count(&id), 0);
}

#[tokio::test]
async fn test_read_info() {
    let sensor = SimulatedSensor::default().with_battery_level(64);
    let (_, manager, id) = manager_with(sensor);

    let info = read_info(&manager, &id, 10).await.unwrap();
    assert_eq!(info.battery_level(), Some(64));
    assert_eq!(info.name(), Some("CC-SIM"));
}

#[tokio::test]
async fn test_download_logs() {
    let logs = vec![
        Celsius::from_tenths(45),
        Celsius::from_tenths(91),
        Celsius::from_tenths(-12),
    ];
    let (_, manager, id) = manager_with(SimulatedSensor::default().with_logs(logs.clone()));

    let download = download_logs(&manager, &id, 10).await.unwrap();
    assert_eq!(download.temperatures, logs);
}

#[tokio::test]
async fn test_download_samples_are_spaced_by_interval() {
    let logs: Vec<Celsius> = (0..12).map(|i| Celsius::from_tenths(40 + i)).collect();
    let (_, manager, id) = manager_with(SimulatedSensor::default().with_logs(logs));

    let before = Timestamp::now();
    let samples = download_samples(&manager, &id, 300, 10).await.unwrap();
    let after = Timestamp::now();

    assert_eq!(samples.len(), 12);
    let newest = samples.last().unwrap().timestamp;
    assert!(newest >= before && newest <= after);
    for pair in samples.windows(2) {
        assert_eq!(pair[1].timestamp - pair[0].timestamp, 300);
    }
    assert_eq!(samples[0].temperature, Celsius::from_tenths(40));
}

#[tokio::test]
async fn test_empty_log_download() {
    let (_, manager, id) = manager_with(SimulatedSensor::default());
    let samples = download_samples(&manager, &id, 300, 10).await.unwrap();
    assert!(samples.is_empty());
}
