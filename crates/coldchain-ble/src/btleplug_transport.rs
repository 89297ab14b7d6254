//! Radio transport backed by btleplug
//!
//! Central-role only: scans for sensors, connects, writes commands without
//! response and subscribes to the notify characteristic. Peripherals seen
//! while scanning are remembered so later connects can find them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use coldchain_core::DeviceId;
use futures::{future, StreamExt};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{FrameStream, ScanResult, ScanStream, Transport};

type PeripheralTable = Arc<RwLock<HashMap<DeviceId, Peripheral>>>;

// ----------------------------------------------------------------------------
// Error Mapping
// ----------------------------------------------------------------------------

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => TransportError::NotConnected,
            btleplug::Error::TimedOut(_) => TransportError::Timeout,
            btleplug::Error::PermissionDenied => TransportError::AdapterUnavailable,
            other => TransportError::io(other.to_string()),
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Implementation
// ----------------------------------------------------------------------------

/// Transport over the first BLE adapter of the host
pub struct BtleplugTransport {
    adapter: Adapter,
    peripherals: PeripheralTable,
    connection_timeout: Duration,
}

impl BtleplugTransport {
    /// Open the first available adapter
    pub async fn new(connection_timeout: Duration) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterUnavailable)?;

        info!("BLE adapter initialized");
        Ok(Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
            connection_timeout,
        })
    }

    async fn peripheral(&self, device_id: &DeviceId) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = self.peripherals.read().await.get(device_id) {
            return Ok(peripheral.clone());
        }

        // Not seen by our scan; the OS may still know it
        for peripheral in self.adapter.peripherals().await? {
            if &peripheral_device_id(&peripheral) == device_id {
                self.peripherals
                    .write()
                    .await
                    .insert(device_id.clone(), peripheral.clone());
                return Ok(peripheral);
            }
        }
        Err(TransportError::io(format!("unknown device {}", device_id)))
    }

    async fn characteristic(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.peripheral(device_id).await?;
        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| {
                TransportError::io(format!("characteristic {} not found", characteristic))
            })?;
        Ok((peripheral, found))
    }
}

fn peripheral_device_id(peripheral: &Peripheral) -> DeviceId {
    let address = peripheral.address().to_string();
    if address != "00:00:00:00:00:00" {
        return DeviceId::new(address);
    }
    // CoreBluetooth hides addresses
    DeviceId::new(format!("{:?}", peripheral.id()))
}

async fn scan_result_for(
    adapter: &Adapter,
    peripherals: &PeripheralTable,
    id: &PeripheralId,
) -> Option<ScanResult> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let device_id = peripheral_device_id(&peripheral);

    peripherals
        .write()
        .await
        .insert(device_id.clone(), peripheral);

    Some(ScanResult {
        device_id,
        name: properties.local_name,
        rssi: properties.rssi,
        manufacturer_data: properties.manufacturer_data,
    })
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn start_scan(&self, services: &[Uuid]) -> Result<ScanStream, TransportError> {
        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await?;

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let results = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
                        scan_result_for(&adapter, &peripherals, &id).await
                    }
                    _ => None,
                }
            }
        });
        Ok(results.boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device_id).await?;
        match timeout(self.connection_timeout, peripheral.connect()).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("Connection to {} timed out", device_id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn disconnect(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device_id).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device_id).await?;
        peripheral.discover_services().await?;
        debug!(
            "Discovered {} characteristics on {}",
            peripheral.characteristics().len(),
            device_id
        );
        Ok(())
    }

    async fn write_without_response(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self
            .characteristic(device_id, service, characteristic)
            .await?;
        peripheral
            .write(&characteristic, payload, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn monitor(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<FrameStream, TransportError> {
        let (peripheral, notify) = self
            .characteristic(device_id, service, characteristic)
            .await?;
        peripheral.subscribe(&notify).await?;

        let uuid = notify.uuid;
        let frames = peripheral
            .notifications()
            .await?
            .filter_map(move |notification| {
                future::ready((notification.uuid == uuid).then_some(notification.value))
            });
        Ok(frames.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            TransportError::from(btleplug::Error::NotConnected),
            TransportError::NotConnected
        );
        assert_eq!(
            TransportError::from(btleplug::Error::TimedOut(Duration::from_secs(1))),
            TransportError::Timeout
        );
        assert!(matches!(
            TransportError::from(btleplug::Error::DeviceNotFound),
            TransportError::Io { .. }
        ));
    }
}
