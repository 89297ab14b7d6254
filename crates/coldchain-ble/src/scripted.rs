//! Scripted in-memory transport
//!
//! Simulates sensors without a radio. Each device answers commands the way
//! the firmware does unless a reply has been scripted, and failures can be
//! injected for connects, discovery and individual writes. Clones share state,
//! so a test keeps one handle while the manager owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use coldchain_core::protocol::{parse_command, text_frame};
use coldchain_core::{Celsius, Command, DeviceEvent, DeviceId, DeviceInfo, LogDownload};
use futures::channel::mpsc;
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{FrameStream, ScanResult, ScanStream, Transport};

// ----------------------------------------------------------------------------
// Script Types
// ----------------------------------------------------------------------------

/// What a device sends back after one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// A decoded event, encoded into frames with a terminator
    Event(DeviceEvent),
    /// Raw notification frames, sent as given
    Frames(Vec<Vec<u8>>),
    /// No reply at all
    Silence,
}

/// One call made against the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Disconnect(DeviceId),
    Discover(DeviceId),
    Write(DeviceId, Vec<u8>),
    Monitor(DeviceId),
}

/// Firmware-side state of one simulated sensor
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    pub name: String,
    pub firmware_version: String,
    pub battery_level: u8,
    pub log_interval: u32,
    pub logging: bool,
    pub logs: Vec<Celsius>,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self {
            name: "CC-SIM".to_string(),
            firmware_version: "1.0.4".to_string(),
            battery_level: 100,
            log_interval: 300,
            logging: false,
            logs: Vec::new(),
        }
    }
}

impl SimulatedSensor {
    pub fn with_logs(mut self, logs: Vec<Celsius>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_battery_level(mut self, level: u8) -> Self {
        self.battery_level = level;
        self
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo::from_lines(vec![
            "SETTINGS".to_string(),
            format!("Name: {}", self.name),
            format!("Ver no: {}", self.firmware_version),
            format!("Batt lvl: {}%", self.battery_level),
            format!("Interval: {}s", self.log_interval),
            format!("Logging: {}", if self.logging { "on" } else { "off" }),
        ])
    }

    /// Apply a command and produce the reply the firmware would send
    fn answer(&mut self, command: Command) -> DeviceEvent {
        match command {
            Command::Info => DeviceEvent::Info(self.info()),
            Command::Blink => DeviceEvent::Ack,
            Command::ToggleLogging => {
                self.logging = !self.logging;
                DeviceEvent::Ack
            }
            Command::DownloadLogs => DeviceEvent::LogDownload(LogDownload::new(self.logs.clone())),
            Command::SetLogInterval { seconds } => {
                self.log_interval = seconds;
                DeviceEvent::LogInterval { seconds }
            }
        }
    }
}

#[derive(Default)]
struct ScriptedDevice {
    sensor: SimulatedSensor,
    connected: bool,
    connect_failures: u32,
    connect_delay: Option<Duration>,
    discover_failure: Option<TransportError>,
    write_failures: VecDeque<TransportError>,
    replies: VecDeque<ScriptedReply>,
    notify_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[derive(Default)]
struct ScriptState {
    devices: HashMap<DeviceId, ScriptedDevice>,
    scan_results: Vec<ScanResult>,
    scan_tx: Option<mpsc::UnboundedSender<ScanResult>>,
    scan_failure: Option<TransportError>,
    stop_scan_failure: Option<TransportError>,
    disconnect_failure: Option<TransportError>,
    calls: Vec<TransportCall>,
}

impl ScriptState {
    fn device(&mut self, device_id: &DeviceId) -> Result<&mut ScriptedDevice, TransportError> {
        self.devices
            .get_mut(device_id)
            .ok_or_else(|| TransportError::io(format!("unknown device {}", device_id)))
    }

    fn connected_device(
        &mut self,
        device_id: &DeviceId,
    ) -> Result<&mut ScriptedDevice, TransportError> {
        let device = self.device(device_id)?;
        if !device.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(device)
    }
}

// ----------------------------------------------------------------------------
// Scripted Transport
// ----------------------------------------------------------------------------

/// In-memory transport driven by a script
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a sensor with stock firmware behaviour
    pub fn add_device(&self, device_id: &DeviceId) -> &Self {
        self.add_sensor(device_id, SimulatedSensor::default())
    }

    pub fn add_sensor(&self, device_id: &DeviceId, sensor: SimulatedSensor) -> &Self {
        self.lock().devices.insert(
            device_id.clone(),
            ScriptedDevice {
                sensor,
                ..Default::default()
            },
        );
        self
    }

    /// Fail the next `count` connects
    pub fn fail_connects(&self, device_id: &DeviceId, count: u32) -> &Self {
        if let Some(device) = self.lock().devices.get_mut(device_id) {
            device.connect_failures = count;
        }
        self
    }

    /// Hold every connect for `delay` before it completes
    pub fn delay_connects(&self, device_id: &DeviceId, delay: Duration) -> &Self {
        if let Some(device) = self.lock().devices.get_mut(device_id) {
            device.connect_delay = Some(delay);
        }
        self
    }

    pub fn fail_discovery(&self, device_id: &DeviceId, error: TransportError) -> &Self {
        if let Some(device) = self.lock().devices.get_mut(device_id) {
            device.discover_failure = Some(error);
        }
        self
    }

    /// Fail the next `count` writes with `error`
    pub fn fail_writes(&self, device_id: &DeviceId, count: u32, error: TransportError) -> &Self {
        if let Some(device) = self.lock().devices.get_mut(device_id) {
            device
                .write_failures
                .extend(std::iter::repeat(error).take(count as usize));
        }
        self
    }

    /// Queue a reply for the next write, overriding the firmware answer
    pub fn push_reply(&self, device_id: &DeviceId, reply: ScriptedReply) -> &Self {
        if let Some(device) = self.lock().devices.get_mut(device_id) {
            device.replies.push_back(reply);
        }
        self
    }

    pub fn fail_scan(&self, error: TransportError) -> &Self {
        self.lock().scan_failure = Some(error);
        self
    }

    pub fn fail_stop_scan(&self, error: TransportError) -> &Self {
        self.lock().stop_scan_failure = Some(error);
        self
    }

    pub fn fail_disconnects(&self, error: TransportError) -> &Self {
        self.lock().disconnect_failure = Some(error);
        self
    }

    /// Report `result` to the running scan, or to the next one
    pub fn advertise(&self, result: ScanResult) {
        let mut state = self.lock();
        let delivered = state
            .scan_tx
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(result.clone()).is_ok());
        if !delivered {
            state.scan_results.push(result);
        }
    }

    /// Push unsolicited frames on the notify characteristic
    pub fn notify(&self, device_id: &DeviceId, frames: Vec<Vec<u8>>) -> bool {
        let state = self.lock();
        let Some(tx) = state
            .devices
            .get(device_id)
            .and_then(|d| d.notify_tx.as_ref())
        else {
            return false;
        };
        frames.into_iter().all(|frame| tx.unbounded_send(frame).is_ok())
    }

    /// Drop the link from the device side
    pub fn drop_link(&self, device_id: &DeviceId) {
        if let Some(device) = self.lock().devices.get_mut(device_id) {
            device.connected = false;
            device.notify_tx = None;
        }
    }

    pub fn sensor(&self, device_id: &DeviceId) -> Option<SimulatedSensor> {
        self.lock().devices.get(device_id).map(|d| d.sensor.clone())
    }

    pub fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.lock()
            .devices
            .get(device_id)
            .is_some_and(|d| d.connected)
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    /// Payloads written to a device, in order
    pub fn writes(&self, device_id: &DeviceId) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write(id, payload) if id == device_id => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn write_count(&self, device_id: &DeviceId) -> usize {
        self.writes(device_id).len()
    }
}

fn reply_frames(reply: ScriptedReply) -> Vec<Vec<u8>> {
    match reply {
        ScriptedReply::Event(event) => event.to_frames(),
        ScriptedReply::Frames(frames) => frames,
        ScriptedReply::Silence => Vec::new(),
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn start_scan(&self, _services: &[Uuid]) -> Result<ScanStream, TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::StartScan);
        if let Some(err) = state.scan_failure.take() {
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded();
        for result in state.scan_results.drain(..) {
            let _ = tx.unbounded_send(result);
        }
        state.scan_tx = Some(tx);
        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::StopScan);
        state.scan_tx = None;
        match state.stop_scan_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn connect(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(TransportCall::Connect(device_id.clone()));
            state.device(device_id)?.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let device = state.device(device_id)?;
        if device.connect_failures > 0 {
            device.connect_failures -= 1;
            return Err(TransportError::io("gatt error 133"));
        }
        device.connected = true;
        Ok(())
    }

    async fn disconnect(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::Disconnect(device_id.clone()));
        if let Some(device) = state.devices.get_mut(device_id) {
            device.connected = false;
            device.notify_tx = None;
        }
        match state.disconnect_failure.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn discover(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::Discover(device_id.clone()));
        let device = state.connected_device(device_id)?;
        match device.discover_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn write_without_response(
        &self,
        device_id: &DeviceId,
        _service: Uuid,
        _characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state
            .calls
            .push(TransportCall::Write(device_id.clone(), payload.to_vec()));
        let device = state.connected_device(device_id)?;

        if let Some(err) = device.write_failures.pop_front() {
            debug!("Scripted write failure on {}: {}", device_id, err);
            return Err(err);
        }

        let frames = match device.replies.pop_front() {
            Some(reply) => reply_frames(reply),
            None => match parse_command(payload) {
                Some(command) => device.sensor.answer(command).to_frames(),
                None => vec![text_frame("ERR"), Vec::new()],
            },
        };

        if let Some(tx) = &device.notify_tx {
            for frame in frames {
                let _ = tx.unbounded_send(frame);
            }
        }
        Ok(())
    }

    async fn monitor(
        &self,
        device_id: &DeviceId,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<FrameStream, TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::Monitor(device_id.clone()));
        let device = state.connected_device(device_id)?;
        let (tx, rx) = mpsc::unbounded();
        device.notify_tx = Some(tx);
        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_firmware_answers_interval_echo() {
        let transport = ScriptedTransport::new();
        let id = DeviceId::new("aa:bb:cc:dd:ee:01");
        transport.add_device(&id);

        transport.connect(&id).await.unwrap();
        let mut frames = transport.monitor(&id, Uuid::nil(), Uuid::nil()).await.unwrap();
        transport
            .write_without_response(&id, Uuid::nil(), Uuid::nil(), b"*lint60")
            .await
            .unwrap();

        assert_eq!(frames.next().await, Some(text_frame("Interval: 60s")));
        assert_eq!(frames.next().await, Some(Vec::new()));
        assert_eq!(transport.sensor(&id).unwrap().log_interval, 60);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let transport = ScriptedTransport::new();
        let id = DeviceId::new("aa:bb:cc:dd:ee:02");
        transport.add_device(&id);

        let err = transport
            .write_without_response(&id, Uuid::nil(), Uuid::nil(), b"*blink")
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert_eq!(transport.write_count(&id), 1);
    }

    #[tokio::test]
    async fn test_connect_failures_are_consumed() {
        let transport = ScriptedTransport::new();
        let id = DeviceId::new("aa:bb:cc:dd:ee:03");
        transport.add_device(&id).fail_connects(&id, 1);

        assert!(transport.connect(&id).await.is_err());
        assert!(transport.connect(&id).await.is_ok());
        assert!(transport.is_connected(&id));
    }
}
