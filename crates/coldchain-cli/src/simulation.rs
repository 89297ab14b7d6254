//! Simulated sensors for `--simulate`

use coldchain_ble::{ScanResult, ScriptedTransport, SimulatedSensor};
use coldchain_core::protocol::SENSOR_COMPANY_ID;
use coldchain_core::{Celsius, DeviceId};

/// Address of the sensor that is always present in simulation
pub const SIMULATED_DEVICE: &str = "C8:4B:2D:00:00:01";

/// A day of five-minute readings with one warm excursion in the afternoon
fn simulated_logs() -> Vec<Celsius> {
    (0..288)
        .map(|i| {
            let tenths = match i {
                170..=185 => 95 + (i % 4) * 3,
                _ => 45 + (i % 6),
            };
            Celsius::from_tenths(tenths)
        })
        .collect()
}

/// Manufacturer payload; fields too wide for the advertisement saturate
fn advertisement_payload(sensor: &SimulatedSensor) -> Vec<u8> {
    let interval = u16::try_from(sensor.log_interval).unwrap_or(u16::MAX);
    let count = u16::try_from(sensor.logs.len()).unwrap_or(u16::MAX);
    let latest = sensor.logs.last().map(Celsius::wire_tenths).unwrap_or(0);

    let mut payload = vec![1, sensor.battery_level];
    payload.extend_from_slice(&interval.to_be_bytes());
    payload.extend_from_slice(&count.to_be_bytes());
    payload.extend_from_slice(&latest.to_be_bytes());
    payload
}

/// Transport with the stock simulated sensor plus every named device
pub fn simulated_transport(devices: &[DeviceId]) -> ScriptedTransport {
    let transport = ScriptedTransport::new();

    let mut ids = vec![DeviceId::new(SIMULATED_DEVICE)];
    for id in devices {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }

    for (n, (id, battery)) in ids.into_iter().zip((53..=92).rev().cycle()).enumerate() {
        let sensor = SimulatedSensor::default()
            .with_battery_level(battery)
            .with_logs(simulated_logs());
        transport.advertise(
            ScanResult::new(id.clone())
                .with_name(format!("{}-{}", sensor.name, n + 1))
                .with_manufacturer_data(SENSOR_COMPANY_ID, advertisement_payload(&sensor)),
        );
        transport.add_sensor(&id, sensor);
    }
    transport
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertisement_round_trip() {
        let sensor = SimulatedSensor::default().with_logs(simulated_logs());
        let result = ScanResult::new(DeviceId::new(SIMULATED_DEVICE))
            .with_manufacturer_data(SENSOR_COMPANY_ID, advertisement_payload(&sensor));

        let advertisement = result.advertisement().unwrap();
        assert_eq!(advertisement.battery_level, sensor.battery_level);
        assert_eq!(advertisement.log_interval, 300);
        assert_eq!(advertisement.log_count, 288);
    }

    #[test]
    fn test_oversized_fields_saturate() {
        let mut sensor = SimulatedSensor::default()
            .with_logs(vec![Celsius::from_tenths(50_000); usize::from(u16::MAX) + 1]);
        sensor.log_interval = 100_000;
        let result = ScanResult::new(DeviceId::new(SIMULATED_DEVICE))
            .with_manufacturer_data(SENSOR_COMPANY_ID, advertisement_payload(&sensor));

        let advertisement = result.advertisement().unwrap();
        assert_eq!(advertisement.log_interval, u16::MAX);
        assert_eq!(advertisement.log_count, u16::MAX);
        assert_eq!(
            advertisement.current_temperature,
            Celsius::from_tenths(i32::from(i16::MAX))
        );
    }

    #[test]
    fn test_named_devices_are_registered() {
        let extra = DeviceId::new("c8:4b:2d:00:00:99");
        let transport = simulated_transport(&[extra.clone()]);
        assert!(transport.sensor(&extra).is_some());
        assert!(transport.sensor(&DeviceId::new(SIMULATED_DEVICE)).is_some());
    }
}
