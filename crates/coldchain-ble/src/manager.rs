//! Device connection management
//!
//! `DeviceManager` owns one connection state per device and is the only code
//! that mutates it. Operations on one device are serialized by a per-device
//! operation lock; different devices proceed in parallel. Scanning runs as an
//! independent background stream.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use coldchain_core::protocol::{decode_reply, encode, ReplyAssembler};
use coldchain_core::retry::execute;
use coldchain_core::{Command, DecodeError, DeviceEvent, DeviceId, RetryError};
use futures::StreamExt;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::DeviceManagerConfig;
use crate::error::{DeviceError, Result, TransportError};
use crate::state::{ConnectionEvent, ConnectionState};
use crate::subscription::{self, Subscriber, Subscription};
use crate::transport::{FrameStream, ScanResult, Transport};

type DeviceTable = Arc<RwLock<HashMap<DeviceId, DeviceEntry>>>;
type ReplyResult = std::result::Result<DeviceEvent, DecodeError>;

// ----------------------------------------------------------------------------
// Device Entries
// ----------------------------------------------------------------------------

struct DeviceEntry {
    state: ConnectionState,
    /// Bumped by connect and disconnect so stale work can detect it lost a race
    generation: u64,
    op_lock: Arc<Mutex<()>>,
    session: Option<Arc<Session>>,
}

impl DeviceEntry {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: 0,
            op_lock: Arc::new(Mutex::new(())),
            session: None,
        }
    }

    fn apply(&mut self, device_id: &DeviceId, event: ConnectionEvent) -> Result<()> {
        let current = std::mem::replace(&mut self.state, ConnectionState::Idle);
        match current.clone().transition(event) {
            Ok(transition) => {
                debug!(
                    "Device {}: {} -> {}",
                    device_id,
                    transition.from_state,
                    transition.new_state.state_name()
                );
                self.state = transition.new_state;
                Ok(())
            }
            Err(err) => {
                self.state = current;
                Err(err.into())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

struct PendingReply {
    command: Command,
    reply_tx: oneshot::Sender<ReplyResult>,
}

/// Live link to one device: notification pump, reply slot and subscribers
struct Session {
    device_id: DeviceId,
    pending: Mutex<Option<PendingReply>>,
    assembler: Mutex<ReplyAssembler>,
    subscribers: Mutex<Vec<Subscriber<DeviceEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            pending: Mutex::new(None),
            assembler: Mutex::new(ReplyAssembler::new()),
            subscribers: Mutex::new(Vec::new()),
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register the reply slot for a command about to be written
    ///
    /// Frames left over from an earlier attempt are discarded.
    async fn begin(&self, command: Command) -> Result<oneshot::Receiver<ReplyResult>> {
        if self.is_closed() {
            return Err(DeviceError::NotConnected {
                device_id: self.device_id.clone(),
            });
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        let mut assembler = self.assembler.lock().await;
        if assembler.pending() > 0 {
            debug!(
                "Discarding {} unterminated frames from {}",
                assembler.pending(),
                self.device_id
            );
            assembler.reset();
        }
        *pending = Some(PendingReply { command, reply_tx });
        Ok(reply_rx)
    }

    async fn cancel_pending(&self) {
        self.pending.lock().await.take();
    }

    async fn subscribe(&self, buffer: usize) -> Subscription<DeviceEvent> {
        let (subscriber, subscription) = subscription::channel(buffer);
        if self.is_closed() {
            subscriber.close();
        } else {
            self.subscribers.lock().await.push(subscriber);
        }
        subscription
    }

    /// Route one complete reply to the waiting command and to subscribers
    async fn dispatch(&self, frames: Vec<Vec<u8>>) {
        let pending = self.pending.lock().await.take();
        let decoded = decode_reply(&frames, pending.as_ref().map(|p| &p.command));

        match &decoded {
            Ok(event) => {
                debug!("Reply from {}: {:?}", self.device_id, event);
                let mut subscribers = self.subscribers.lock().await;
                subscribers.retain(|s| s.deliver(event.clone()));
            }
            Err(err) => warn!("Dropping malformed reply from {}: {}", self.device_id, err),
        }

        if let Some(pending) = pending {
            let _ = pending.reply_tx.send(decoded);
        }
    }

    async fn replace_pump(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.pump.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Forget the pump handle without aborting it
    async fn detach_pump(&self) {
        self.pump.lock().await.take();
    }

    /// Stop all delivery; nothing is yielded to subscribers afterwards
    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        for subscriber in self.subscribers.lock().await.drain(..) {
            subscriber.close();
        }
        self.pending.lock().await.take();
    }
}

async fn run_notification_pump(
    mut frames: FrameStream,
    session: Arc<Session>,
    devices: DeviceTable,
    generation: u64,
) {
    while let Some(frame) = frames.next().await {
        if session.is_closed() {
            return;
        }
        let reply = session.assembler.lock().await.push(&frame);
        if let Some(reply) = reply {
            session.dispatch(reply).await;
        }
    }

    if session.is_closed() {
        return;
    }
    info!("Notification stream of {} ended, link lost", session.device_id);
    session.detach_pump().await;
    session.close().await;

    let mut devices = devices.write().await;
    if let Some(entry) = devices.get_mut(&session.device_id) {
        if entry.generation == generation {
            entry.session = None;
            let _ = entry.apply(&session.device_id, ConnectionEvent::Disconnect);
        }
    }
}

struct ActiveScan {
    task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl ActiveScan {
    fn cancel(self) {
        self.closed.store(true, Ordering::Release);
        self.task.abort();
    }
}

// ----------------------------------------------------------------------------
// Device Manager
// ----------------------------------------------------------------------------

/// Reliable device operations over a raw transport
pub struct DeviceManager<T: Transport> {
    transport: Arc<T>,
    config: DeviceManagerConfig,
    devices: DeviceTable,
    scan: Mutex<Option<ActiveScan>>,
}

impl<T: Transport> DeviceManager<T> {
    pub fn new(transport: T, config: DeviceManagerConfig) -> Self {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    pub fn with_shared_transport(transport: Arc<T>, config: DeviceManagerConfig) -> Self {
        Self {
            transport,
            config,
            devices: Arc::new(RwLock::new(HashMap::new())),
            scan: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DeviceManagerConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Current state of a device; `Idle` if never seen
    pub async fn state(&self, device_id: &DeviceId) -> ConnectionState {
        self.devices
            .read()
            .await
            .get(device_id)
            .map(|e| e.state.clone())
            .unwrap_or(ConnectionState::Idle)
    }

    /// Devices with a live link
    pub async fn connected_devices(&self) -> Vec<DeviceId> {
        let devices = self.devices.read().await;
        let mut ids: Vec<DeviceId> = devices
            .iter()
            .filter(|(_, e)| e.state.is_connected())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    pub async fn is_scanning(&self) -> bool {
        self.scan.lock().await.is_some()
    }

    /// Start an unbounded scan, replacing any scan already running
    ///
    /// With a filter only the listed devices are reported.
    pub async fn start_scan(
        &self,
        filter: Option<Vec<DeviceId>>,
    ) -> Result<Subscription<ScanResult>> {
        let mut scan = self.scan.lock().await;
        if let Some(active) = scan.take() {
            debug!("Replacing active scan");
            active.cancel();
        }

        let mut results = self
            .transport
            .start_scan(&[self.config.service_uuid])
            .await?;
        let (subscriber, subscription) = subscription::channel(self.config.subscription_buffer);
        let closed = subscriber.closed_flag();
        let filter: Option<HashSet<DeviceId>> = filter.map(|ids| ids.into_iter().collect());

        let task = tokio::spawn(async move {
            while let Some(result) = results.next().await {
                if filter
                    .as_ref()
                    .is_some_and(|ids| !ids.contains(&result.device_id))
                {
                    continue;
                }
                if !subscriber.deliver(result) {
                    break;
                }
            }
            debug!("Scan stream ended");
        });

        *scan = Some(ActiveScan { task, closed });
        info!("Started scanning for {}", self.config.service_uuid);
        Ok(subscription)
    }

    /// Cancel the running scan; a no-op when none is running
    pub async fn stop_scan(&self) -> Result<()> {
        let Some(active) = self.scan.lock().await.take() else {
            return Ok(());
        };
        active.cancel();
        self.transport.stop_scan().await?;
        info!("Stopped scanning");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------------

    /// Establish a link; not retried here
    pub async fn connect(&self, device_id: &DeviceId) -> Result<()> {
        let (op_lock, generation) = {
            let mut devices = self.devices.write().await;
            let entry = devices
                .entry(device_id.clone())
                .or_insert_with(DeviceEntry::new);
            if entry.state.is_connecting() {
                return Err(DeviceError::AlreadyConnecting {
                    device_id: device_id.clone(),
                });
            }
            if entry.state.is_connected() {
                return Err(DeviceError::AlreadyConnected {
                    device_id: device_id.clone(),
                });
            }
            entry.apply(device_id, ConnectionEvent::Connect)?;
            entry.generation += 1;
            (entry.op_lock.clone(), entry.generation)
        };

        let _guard = op_lock.lock().await;
        if !self.is_current(device_id, generation).await {
            return Err(self.cancelled_connect(device_id));
        }

        info!("Connecting to {}", device_id);
        let result = match timeout(
            self.config.connection_timeout,
            self.transport.connect(device_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        let mut devices = self.devices.write().await;
        let stale = devices
            .get(device_id)
            .map_or(true, |e| e.generation != generation);
        if stale {
            drop(devices);
            if result.is_ok() {
                let _ = self.transport.disconnect(device_id).await;
            }
            return Err(self.cancelled_connect(device_id));
        }
        let Some(entry) = devices.get_mut(device_id) else {
            return Err(self.cancelled_connect(device_id));
        };

        match result {
            Ok(()) => {
                entry.apply(device_id, ConnectionEvent::LinkEstablished)?;
                entry.session = Some(Arc::new(Session::new(device_id.clone())));
                info!("Connected to {}", device_id);
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                entry.apply(
                    device_id,
                    ConnectionEvent::Failure {
                        reason: reason.clone(),
                    },
                )?;
                error!("Failed to connect to {}: {}", device_id, reason);
                Err(DeviceError::ConnectionFailed {
                    device_id: device_id.clone(),
                    reason,
                })
            }
        }
    }

    /// Discover services and start the notification pump
    pub async fn discover_capabilities(&self, device_id: &DeviceId) -> Result<()> {
        let op_lock = {
            let devices = self.devices.read().await;
            match devices.get(device_id) {
                Some(entry) if entry.state.can_monitor() => entry.op_lock.clone(),
                _ => return Err(self.not_connected_for_discovery(device_id)),
            }
        };
        let _guard = op_lock.lock().await;

        let (session, generation) = {
            let mut devices = self.devices.write().await;
            let entry = match devices.get_mut(device_id) {
                Some(entry) if entry.state.can_monitor() => entry,
                _ => return Err(self.not_connected_for_discovery(device_id)),
            };
            let Some(session) = entry.session.clone() else {
                return Err(self.not_connected_for_discovery(device_id));
            };
            entry.apply(device_id, ConnectionEvent::StartDiscovery)?;
            (session, entry.generation)
        };

        let result = match self.transport.discover(device_id).await {
            Ok(()) => {
                self.transport
                    .monitor(
                        device_id,
                        self.config.service_uuid,
                        self.config.notify_characteristic_uuid,
                    )
                    .await
            }
            Err(err) => Err(err),
        };

        let mut devices = self.devices.write().await;
        let entry = match devices.get_mut(device_id) {
            Some(entry) if entry.generation == generation => entry,
            _ => {
                session.close().await;
                return Err(self.not_connected_for_discovery(device_id));
            }
        };

        match result {
            Ok(frames) => {
                let pump = tokio::spawn(run_notification_pump(
                    frames,
                    session.clone(),
                    self.devices.clone(),
                    generation,
                ));
                session.replace_pump(pump).await;
                entry.apply(device_id, ConnectionEvent::CapabilitiesDiscovered)?;
                info!("Device {} ready", device_id);
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                entry.apply(
                    device_id,
                    ConnectionEvent::Failure {
                        reason: reason.clone(),
                    },
                )?;
                entry.session = None;
                drop(devices);
                session.close().await;
                error!("Discovery failed for {}: {}", device_id, reason);
                Err(DeviceError::DiscoveryFailed {
                    device_id: device_id.clone(),
                    reason,
                })
            }
        }
    }

    /// Tear down the link
    ///
    /// Always succeeds locally. Subscriptions are closed before the transport
    /// is asked to disconnect, and transport errors are only logged.
    pub async fn disconnect(&self, device_id: &DeviceId) -> Result<()> {
        let op_lock = {
            let mut devices = self.devices.write().await;
            devices
                .entry(device_id.clone())
                .or_insert_with(DeviceEntry::new)
                .op_lock
                .clone()
        };
        let _guard = op_lock.lock().await;

        let session = {
            let mut devices = self.devices.write().await;
            let entry = devices
                .entry(device_id.clone())
                .or_insert_with(DeviceEntry::new);
            entry.generation += 1;
            entry.apply(device_id, ConnectionEvent::Disconnect)?;
            entry.session.take()
        };
        if let Some(session) = session {
            session.close().await;
        }

        if let Err(err) = self.transport.disconnect(device_id).await {
            debug!("Ignoring transport error on disconnect of {}: {}", device_id, err);
        }
        info!("Disconnected from {}", device_id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Commands and Notifications
    // ------------------------------------------------------------------------

    /// Write a command and wait for its reply, retrying up to `max_attempts`
    pub async fn write_command(
        &self,
        device_id: &DeviceId,
        command: Command,
        max_attempts: u32,
    ) -> Result<DeviceEvent> {
        let payload = encode(&command, &self.config.firmware)?;

        let (op_lock, _) = self.require_ready(device_id).await?;
        let _guard = op_lock.lock().await;
        let (_, session) = self.require_ready(device_id).await?;

        let session = &session;
        let payload = payload.as_slice();
        let outcome = execute(max_attempts, move || {
            self.attempt_write(device_id, session, command, payload)
        })
        .await;

        match outcome {
            Ok(event) => {
                debug!("Command {} acknowledged by {}", command, device_id);
                Ok(event)
            }
            Err(RetryError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                error!(
                    "Command {} to {} failed after {} attempts: {}",
                    command, device_id, attempts, last_error
                );
                Err(DeviceError::CommandFailed {
                    command,
                    attempts,
                    reason: last_error.to_string(),
                })
            }
            Err(RetryError::Terminal(err)) => Err(err),
        }
    }

    /// Subscribe to every decoded event of a device
    pub async fn monitor(&self, device_id: &DeviceId) -> Result<Subscription<DeviceEvent>> {
        let session = {
            let devices = self.devices.read().await;
            let entry = devices
                .get(device_id)
                .ok_or_else(|| DeviceError::NotConnected {
                    device_id: device_id.clone(),
                })?;
            if !entry.state.can_monitor() {
                return Err(self.precondition_error(device_id, &entry.state));
            }
            entry
                .session
                .clone()
                .ok_or_else(|| DeviceError::NotConnected {
                    device_id: device_id.clone(),
                })?
        };
        Ok(session.subscribe(self.config.subscription_buffer).await)
    }

    /// Stop scanning and disconnect every device
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_scan().await?;
        let ids: Vec<DeviceId> = self.devices.read().await.keys().cloned().collect();
        for id in ids {
            self.disconnect(&id).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn attempt_write(
        &self,
        device_id: &DeviceId,
        session: &Session,
        command: Command,
        payload: &[u8],
    ) -> Result<DeviceEvent> {
        let reply_rx = session.begin(command).await?;

        if let Err(err) = self
            .transport
            .write_without_response(
                device_id,
                self.config.service_uuid,
                self.config.write_characteristic_uuid,
                payload,
            )
            .await
        {
            session.cancel_pending().await;
            return Err(err.into());
        }
        debug!("Wrote {} to {}", hex::encode(payload), device_id);

        match timeout(self.config.reply_timeout, reply_rx).await {
            Err(_) => {
                session.cancel_pending().await;
                Err(TransportError::Timeout.into())
            }
            Ok(Err(_)) => Err(DeviceError::NotConnected {
                device_id: device_id.clone(),
            }),
            Ok(Ok(Err(err))) => Err(DeviceError::Decode(err)),
            Ok(Ok(Ok(event))) if event.acknowledges(&command) => Ok(event),
            Ok(Ok(Ok(event))) => {
                debug!("Device {} did not acknowledge {}: {:?}", device_id, command, event);
                Err(TransportError::Nack {
                    reply: format!("{:?}", event),
                }
                .into())
            }
        }
    }

    async fn require_ready(&self, device_id: &DeviceId) -> Result<(Arc<Mutex<()>>, Arc<Session>)> {
        let devices = self.devices.read().await;
        let entry = devices
            .get(device_id)
            .ok_or_else(|| DeviceError::NotConnected {
                device_id: device_id.clone(),
            })?;
        if !entry.state.is_ready() {
            return Err(self.precondition_error(device_id, &entry.state));
        }
        let session = entry
            .session
            .clone()
            .ok_or_else(|| DeviceError::NotConnected {
                device_id: device_id.clone(),
            })?;
        Ok((entry.op_lock.clone(), session))
    }

    async fn is_current(&self, device_id: &DeviceId, generation: u64) -> bool {
        self.devices
            .read()
            .await
            .get(device_id)
            .is_some_and(|e| e.generation == generation)
    }

    fn precondition_error(&self, device_id: &DeviceId, state: &ConnectionState) -> DeviceError {
        if state.is_connected() || state.is_connecting() {
            DeviceError::NotReady {
                device_id: device_id.clone(),
            }
        } else {
            DeviceError::NotConnected {
                device_id: device_id.clone(),
            }
        }
    }

    fn not_connected_for_discovery(&self, device_id: &DeviceId) -> DeviceError {
        DeviceError::DiscoveryFailed {
            device_id: device_id.clone(),
            reason: "device is not connected".to_string(),
        }
    }

    fn cancelled_connect(&self, device_id: &DeviceId) -> DeviceError {
        DeviceError::ConnectionFailed {
            device_id: device_id.clone(),
            reason: "disconnected while connecting".to_string(),
        }
    }
}
