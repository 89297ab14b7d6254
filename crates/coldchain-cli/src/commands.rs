//! Command handlers for the cold-chain CLI

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use coldchain_ble::{
    download_samples, read_info, run_command, setup_new_sensor, BtleplugTransport, DeviceManager,
    ScanResult, Transport,
};
use coldchain_core::report::{breach_report, log_report, sensor_stats};
use coldchain_core::{
    Advertisement, Command, DeviceId, LogPipeline, MemoryLogStore, SensorId, SyncBatch, SyncSink,
    TemperatureSample, ThresholdSet, Timestamp,
};
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::simulation::simulated_transport;
use crate::sink::WriterSyncSink;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Classify {
                samples,
                thresholds,
                sync,
            } => {
                Self::handle_classify_command(&config, &samples, thresholds.as_deref(), sync)
                    .await
            }
            Commands::Report {
                samples,
                thresholds,
                breaches,
                now,
            } => Self::handle_report_command(
                &config,
                &samples,
                thresholds.as_deref(),
                breaches,
                now.map(Timestamp::new).unwrap_or_else(Timestamp::now),
            ),
            Commands::Config => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
            command => {
                let manager_config = config.manager_config();
                if cli.simulate {
                    info!("Using simulated sensors");
                    let transport = simulated_transport(&Self::named_devices(&command)?);
                    let manager = DeviceManager::new(transport, manager_config);
                    Self::execute_device_command(&manager, command, &config).await
                } else {
                    let transport =
                        BtleplugTransport::new(manager_config.connection_timeout).await?;
                    let manager = DeviceManager::new(transport, manager_config);
                    let result = Self::execute_device_command(&manager, command, &config).await;
                    if let Err(e) = manager.shutdown().await {
                        warn!("Shutdown failed: {}", e);
                    }
                    result
                }
            }
        }
    }

    /// Commands that talk to sensors
    async fn execute_device_command<T: Transport>(
        manager: &DeviceManager<T>,
        command: Commands,
        config: &AppConfig,
    ) -> Result<()> {
        let attempts = |requested: Option<u32>| requested.unwrap_or(config.ble.command_attempts);

        match command {
            Commands::Scan { duration, devices } => {
                let duration = duration.unwrap_or(config.ble.scan_seconds);
                let filter = if devices.is_empty() {
                    None
                } else {
                    Some(parse_devices(&devices)?)
                };
                Self::handle_scan_command(manager, Duration::from_secs(duration), filter).await
            }
            Commands::Setup {
                device,
                interval,
                attempts: requested,
            } => {
                let device_id = parse_device(&device)?;
                let interval = interval.unwrap_or(config.default_log_interval);
                let advertisement = Self::latest_advertisement(
                    manager,
                    &device_id,
                    Duration::from_secs(config.ble.scan_seconds),
                )
                .await;
                let setup = setup_new_sensor(
                    manager,
                    &device_id,
                    interval,
                    advertisement.as_ref(),
                    attempts(requested),
                )
                .await?;
                println!("{}", serde_json::to_string_pretty(&setup)?);
                Ok(())
            }
            Commands::Info {
                device,
                attempts: requested,
            } => {
                let device_id = parse_device(&device)?;
                let info = read_info(manager, &device_id, attempts(requested)).await?;
                for line in &info.lines {
                    println!("{}", line);
                }
                Ok(())
            }
            Commands::Blink {
                device,
                attempts: requested,
            } => {
                let device_id = parse_device(&device)?;
                run_command(manager, &device_id, Command::Blink, attempts(requested)).await?;
                println!("{} blinked", device_id);
                Ok(())
            }
            Commands::Download {
                device,
                interval,
                attempts: requested,
                output,
            } => {
                let device_id = parse_device(&device)?;
                let interval = interval.unwrap_or(config.default_log_interval);
                let samples =
                    download_samples(manager, &device_id, interval, attempts(requested)).await?;
                let json = serde_json::to_string_pretty(&samples)?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, json)?;
                        info!("Wrote {} samples to {}", samples.len(), path.display());
                    }
                    None => println!("{}", json),
                }
                Ok(())
            }
            other => Err(CliError::InvalidArgument(format!(
                "{:?} does not talk to a sensor",
                other
            ))),
        }
    }

    /// Handle the scan command
    async fn handle_scan_command<T: Transport>(
        manager: &DeviceManager<T>,
        duration: Duration,
        filter: Option<Vec<DeviceId>>,
    ) -> Result<()> {
        info!("Scanning for {}s", duration.as_secs());
        let mut results = manager.start_scan(filter).await?;
        let mut seen = HashSet::new();

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                result = results.recv() => match result {
                    Some(result) => {
                        if seen.insert(result.device_id.clone()) {
                            print_scan_result(&result);
                        }
                    }
                    None => break,
                },
            }
        }

        manager.stop_scan().await?;
        info!("Found {} sensors", seen.len());
        Ok(())
    }

    /// Most recent advertisement of one device, if it shows up in time
    async fn latest_advertisement<T: Transport>(
        manager: &DeviceManager<T>,
        device_id: &DeviceId,
        duration: Duration,
    ) -> Option<Advertisement> {
        let mut results = match manager.start_scan(Some(vec![device_id.clone()])).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Could not scan for {}: {}", device_id, e);
                return None;
            }
        };

        let found = tokio::time::timeout(duration, async {
            while let Some(result) = results.recv().await {
                if let Some(advertisement) = result.advertisement() {
                    return Some(advertisement);
                }
            }
            None
        })
        .await
        .ok()
        .flatten();

        if let Err(e) = manager.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        if found.is_none() {
            warn!("No advertisement from {}, battery level unknown", device_id);
        }
        found
    }

    /// Handle the classify command
    async fn handle_classify_command(
        config: &AppConfig,
        samples: &Path,
        thresholds: Option<&Path>,
        sync: bool,
    ) -> Result<()> {
        let thresholds = load_thresholds(config, thresholds)?;
        let pipeline = LogPipeline::new(thresholds, MemoryLogStore::new());
        let sink = WriterSyncSink::stdout();

        for (sensor_id, batch) in load_samples(samples)? {
            let report = pipeline.ingest(&sensor_id, batch)?;
            println!(
                "{}: {} inserted, {} duplicates, {} late, {} breaches changed",
                sensor_id,
                report.inserted,
                report.duplicates,
                report.late,
                report.changed_breaches.len()
            );
            for breach in &report.changed_breaches {
                println!(
                    "  {} {} from {} to {}",
                    breach.id,
                    breach.config_id,
                    breach.start_timestamp,
                    breach
                        .end_timestamp
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "open".to_string())
                );
            }

            if sync {
                let thresholds = pipeline.thresholds_for(&sensor_id);
                let batch = pipeline
                    .with_log(&sensor_id, |log| SyncBatch::from_log(log, &thresholds))
                    .unwrap_or_default();
                sink.push(&batch).await?;
            }
        }
        Ok(())
    }

    /// Handle the report command
    fn handle_report_command(
        config: &AppConfig,
        samples: &Path,
        thresholds: Option<&Path>,
        include_breaches: bool,
        now: Timestamp,
    ) -> Result<()> {
        let thresholds = load_thresholds(config, thresholds)?;
        let pipeline = LogPipeline::new(thresholds, MemoryLogStore::new());
        for (sensor_id, batch) in load_samples(samples)? {
            pipeline.ingest(&sensor_id, batch)?;
        }

        for sensor_id in pipeline.sensors() {
            pipeline.with_log(&sensor_id, |log| {
                let stats = sensor_stats(log);
                println!("Sensor {}", stats.sensor_id);
                println!("  samples:             {}", stats.sample_count);
                println!("  max temperature:     {}", display_or_dash(stats.max_temperature));
                println!("  min temperature:     {}", display_or_dash(stats.min_temperature));
                println!("  continuous breaches: {}", stats.continuous_breaches);
                println!("  cumulative active:   {}", stats.active_cumulative_breaches);

                println!(
                    "  {:<12} {:>8} {:>6} {:<16} {}",
                    "timestamp", "temp", "int", "continuous", "cumulative"
                );
                for row in log_report(log) {
                    println!(
                        "  {:<12} {:>8} {:>6} {:<16} {}",
                        row.timestamp,
                        row.temperature.to_string(),
                        row.log_interval,
                        format!("{:?}", row.continuous),
                        row.cumulative
                    );
                }

                if include_breaches {
                    println!("  Breaches:");
                    for row in breach_report(log, now) {
                        println!(
                            "  {} {} start {} end {} exposure {}s samples {} min {} max {}{}",
                            row.breach.id,
                            row.breach.config_id,
                            row.breach.start_timestamp,
                            display_or_dash(row.breach.end_timestamp),
                            row.exposure_seconds,
                            row.sample_count,
                            display_or_dash(row.min_temperature),
                            display_or_dash(row.max_temperature),
                            if row.breach.acknowledged { " (acknowledged)" } else { "" }
                        );
                    }
                }
            });
        }
        Ok(())
    }

    fn named_devices(command: &Commands) -> Result<Vec<DeviceId>> {
        match command {
            Commands::Setup { device, .. }
            | Commands::Info { device, .. }
            | Commands::Blink { device, .. }
            | Commands::Download { device, .. } => Ok(vec![parse_device(device)?]),
            Commands::Scan { devices, .. } => parse_devices(devices),
            _ => Ok(Vec::new()),
        }
    }
}

fn parse_device(address: &str) -> Result<DeviceId> {
    address
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("invalid device address '{}'", address)))
}

fn parse_devices(addresses: &[String]) -> Result<Vec<DeviceId>> {
    addresses.iter().map(|a| parse_device(a)).collect()
}

fn load_thresholds(config: &AppConfig, path: Option<&Path>) -> Result<ThresholdSet> {
    match path {
        Some(path) => Ok(ThresholdSet::from_json(&std::fs::read_to_string(path)?)?),
        None => config.threshold_set(),
    }
}

/// Read a samples file and group it by sensor
pub fn load_samples(path: &Path) -> Result<BTreeMap<SensorId, Vec<TemperatureSample>>> {
    let samples: Vec<TemperatureSample> =
        serde_json::from_str(&std::fs::read_to_string(path)?)?;

    let mut by_sensor: BTreeMap<SensorId, Vec<TemperatureSample>> = BTreeMap::new();
    for sample in samples {
        by_sensor
            .entry(sample.sensor_id.clone())
            .or_default()
            .push(sample);
    }
    Ok(by_sensor)
}

fn print_scan_result(result: &ScanResult) {
    let name = result.name.as_deref().unwrap_or("-");
    let rssi = display_or_dash(result.rssi);
    match result.advertisement() {
        Some(adv) => println!(
            "{}  {:<12} rssi {:>4}  battery {:>3}%  interval {:>5}s  records {:>5}  {}",
            result.device_id,
            name,
            rssi,
            adv.battery_level,
            adv.log_interval,
            adv.log_count,
            adv.current_temperature
        ),
        None => println!("{}  {:<12} rssi {:>4}", result.device_id, name, rssi),
    }
}

fn display_or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
