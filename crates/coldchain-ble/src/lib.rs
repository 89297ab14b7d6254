//! Bluetooth Low Energy device layer for cold-chain temperature sensors
//!
//! This crate turns raw radio primitives into reliable sensor operations on
//! top of the codec and retry executor in `coldchain-core`.
//!
//! ## Architecture
//!
//! - [`transport`] - Raw transport capability consumed by the manager
//! - [`state`] - Per-device connection state machine
//! - [`manager`] - Device manager: connect, discover, write, monitor, scan
//! - [`subscription`] - Cancellable scan and event subscriptions
//! - [`workflow`] - Sequential sensor workflows (setup, info, download)
//! - [`btleplug_transport`] - Transport over the host BLE adapter
//! - [`scripted`] - In-memory transport for tests and simulation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use coldchain_ble::{BtleplugTransport, DeviceManager, DeviceManagerConfig};
//! use coldchain_core::{Command, DeviceId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceManagerConfig::new();
//! let transport = BtleplugTransport::new(config.connection_timeout).await?;
//! let manager = DeviceManager::new(transport, config);
//!
//! let sensor = DeviceId::new("C8:4B:2D:10:00:01");
//! manager.connect(&sensor).await?;
//! manager.discover_capabilities(&sensor).await?;
//! manager.write_command(&sensor, Command::Blink, 10).await?;
//! manager.disconnect(&sensor).await?;
//! # Ok(())
//! # }
//! ```

pub mod btleplug_transport;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod scripted;
pub mod state;
pub mod subscription;
pub mod transport;
pub mod workflow;

// Public API exports
pub use btleplug_transport::BtleplugTransport;
pub use config::{DeviceManagerConfig, DEFAULT_COMMAND_ATTEMPTS};
pub use error::{DeviceError, Result, TransportError};
pub use manager::DeviceManager;
pub use protocol::{
    SENSOR_NOTIFY_CHARACTERISTIC_UUID, SENSOR_SERVICE_UUID, SENSOR_WRITE_CHARACTERISTIC_UUID,
};
pub use scripted::{ScriptedReply, ScriptedTransport, SimulatedSensor, TransportCall};
pub use state::{ConnectionEvent, ConnectionState, StateTransition, StateTransitionError};
pub use subscription::Subscription;
pub use transport::{FrameStream, ScanResult, ScanStream, Transport};
pub use workflow::{
    download_logs, download_samples, read_info, run_command, setup_new_sensor, SensorSetup,
};
