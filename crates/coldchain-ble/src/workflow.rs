//! Sequential sensor workflows
//!
//! Each workflow composes the device manager primitives into one operation
//! returning a single result. Attempts per command are parameters, not
//! control flow. A workflow that connected a device always disconnects it
//! before returning, whatever the outcome.

use std::future::Future;

use coldchain_core::{
    samples_from_download, Advertisement, Command, DeviceEvent, DeviceId, DeviceInfo,
    LogDownload, SensorId, TemperatureSample, Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DeviceError, Result};
use crate::manager::DeviceManager;
use crate::transport::Transport;

/// Outcome of configuring a new sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSetup {
    pub device_id: DeviceId,
    pub log_interval: u32,
    /// Taken from the most recent advertisement, when one was seen
    pub battery_level: Option<u8>,
}

/// Run `body` against a ready device and disconnect afterwards
async fn with_ready_device<T, R, F, Fut>(
    manager: &DeviceManager<T>,
    device_id: &DeviceId,
    body: F,
) -> Result<R>
where
    T: Transport,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    manager.connect(device_id).await?;

    let outcome = match manager.discover_capabilities(device_id).await {
        Ok(()) => body().await,
        Err(err) => Err(err),
    };

    if let Err(err) = manager.disconnect(device_id).await {
        warn!("Disconnect of {} after workflow failed: {}", device_id, err);
    }
    outcome
}

/// Configure a new sensor: set the logging interval and start logging
pub async fn setup_new_sensor<T: Transport>(
    manager: &DeviceManager<T>,
    device_id: &DeviceId,
    log_interval: u32,
    advertisement: Option<&Advertisement>,
    max_attempts: u32,
) -> Result<SensorSetup> {
    info!("Setting up sensor {} with {}s interval", device_id, log_interval);

    with_ready_device(manager, device_id, move || async move {
        manager
            .write_command(
                device_id,
                Command::SetLogInterval {
                    seconds: log_interval,
                },
                max_attempts,
            )
            .await?;
        manager
            .write_command(device_id, Command::ToggleLogging, max_attempts)
            .await?;
        Ok(())
    })
    .await?;

    let setup = SensorSetup {
        device_id: device_id.clone(),
        log_interval,
        battery_level: advertisement.map(|a| a.battery_level),
    };
    info!("Sensor {} configured", device_id);
    Ok(setup)
}

/// Connect, run one command and disconnect
pub async fn run_command<T: Transport>(
    manager: &DeviceManager<T>,
    device_id: &DeviceId,
    command: Command,
    max_attempts: u32,
) -> Result<DeviceEvent> {
    with_ready_device(manager, device_id, move || {
        manager.write_command(device_id, command, max_attempts)
    })
    .await
}

/// Read the settings block of a sensor
pub async fn read_info<T: Transport>(
    manager: &DeviceManager<T>,
    device_id: &DeviceId,
    max_attempts: u32,
) -> Result<DeviceInfo> {
    match run_command(manager, device_id, Command::Info, max_attempts).await? {
        DeviceEvent::Info(info) => Ok(info),
        other => Err(unexpected_reply(Command::Info, &other)),
    }
}

/// Download every stored temperature record
pub async fn download_logs<T: Transport>(
    manager: &DeviceManager<T>,
    device_id: &DeviceId,
    max_attempts: u32,
) -> Result<LogDownload> {
    match run_command(manager, device_id, Command::DownloadLogs, max_attempts).await? {
        DeviceEvent::LogDownload(download) => {
            info!(
                "Downloaded {} records from {}",
                download.temperatures.len(),
                device_id
            );
            Ok(download)
        }
        other => Err(unexpected_reply(Command::DownloadLogs, &other)),
    }
}

/// Download logs and timestamp them backwards from now
pub async fn download_samples<T: Transport>(
    manager: &DeviceManager<T>,
    device_id: &DeviceId,
    log_interval: u32,
    max_attempts: u32,
) -> Result<Vec<TemperatureSample>> {
    let download = download_logs(manager, device_id, max_attempts).await?;
    Ok(samples_from_download(
        &SensorId::from(device_id),
        &download,
        log_interval,
        Timestamp::now(),
    ))
}

fn unexpected_reply(command: Command, event: &DeviceEvent) -> DeviceError {
    DeviceError::CommandFailed {
        command,
        attempts: 1,
        reason: format!("unexpected reply {:?}", event),
    }
}
