//! Transport capability consumed by the device manager
//!
//! A transport exposes the raw radio primitives. It knows nothing about
//! commands, retries or connection state; those live in the manager.

use std::collections::HashMap;

use async_trait::async_trait;
use coldchain_core::protocol::{Advertisement, SENSOR_COMPANY_ID};
use coldchain_core::DeviceId;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::TransportError;

/// One advertisement seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub device_id: DeviceId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Manufacturer data keyed by company id, company id stripped
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl ScanResult {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            name: None,
            rssi: None,
            manufacturer_data: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_manufacturer_data(mut self, company: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data.insert(company, data);
        self
    }

    /// Sensor advertisement carried in the manufacturer data, if any
    pub fn advertisement(&self) -> Option<Advertisement> {
        let payload = self.manufacturer_data.get(&SENSOR_COMPANY_ID)?;
        Advertisement::parse(payload).ok()
    }
}

/// Unbounded stream of scan results
pub type ScanStream = BoxStream<'static, ScanResult>;

/// Notification frames in arrival order; an empty frame terminates a reply
pub type FrameStream = BoxStream<'static, Vec<u8>>;

/// Raw radio primitives for one adapter
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start discovery of devices advertising one of `services`
    async fn start_scan(&self, services: &[Uuid]) -> Result<ScanStream, TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, device_id: &DeviceId) -> Result<(), TransportError>;

    async fn disconnect(&self, device_id: &DeviceId) -> Result<(), TransportError>;

    /// Discover services and characteristics of a connected device
    async fn discover(&self, device_id: &DeviceId) -> Result<(), TransportError>;

    async fn write_without_response(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Subscribe to notifications of one characteristic
    async fn monitor(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<FrameStream, TransportError>;
}
