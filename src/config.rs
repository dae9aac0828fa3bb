use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::refresh::DEFAULT_QUEUE_CAPACITY;
use crate::ReservedSet;

const DEFAULT_RECORD_PATH: &str = "output/occupancy.json";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_RESERVED_SPOT: &str = "spot_1";
const DEFAULT_FRAME_PATH: &str = "static/parking.jpg";
const DEFAULT_DETECTOR_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct ParkingConfigFile {
    record_path: Option<PathBuf>,
    reserved_spots: Option<Vec<String>>,
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    refresh: Option<RefreshConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    command: Option<Vec<String>>,
    frame_path: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RefreshConfigFile {
    queue_capacity: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ParkingConfig {
    pub record_path: PathBuf,
    pub reserved_spots: Vec<String>,
    pub api_addr: String,
    pub detector: DetectorSettings,
    pub refresh_queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Program followed by its arguments. `None` disables background refresh.
    pub command: Option<Vec<String>>,
    pub frame_path: PathBuf,
    pub timeout: Duration,
}

impl ParkingConfig {
    /// File named by `PARKING_CONFIG` (optional), then `PARKING_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PARKING_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ParkingConfigFile) -> Self {
        let record_path = file
            .record_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORD_PATH));
        let reserved_spots = file
            .reserved_spots
            .unwrap_or_else(|| vec![DEFAULT_RESERVED_SPOT.to_string()]);
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let detector = DetectorSettings {
            command: file
                .detector
                .as_ref()
                .and_then(|detector| detector.command.clone()),
            frame_path: file
                .detector
                .as_ref()
                .and_then(|detector| detector.frame_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAME_PATH)),
            timeout: Duration::from_secs(
                file.detector
                    .and_then(|detector| detector.timeout_secs)
                    .unwrap_or(DEFAULT_DETECTOR_TIMEOUT_SECS),
            ),
        };
        let refresh_queue_capacity = file
            .refresh
            .and_then(|refresh| refresh.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        Self {
            record_path,
            reserved_spots,
            api_addr,
            detector,
            refresh_queue_capacity,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PARKING_RECORD_PATH") {
            if !path.trim().is_empty() {
                self.record_path = PathBuf::from(path);
            }
        }
        if let Ok(addr) = std::env::var("PARKING_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(spots) = std::env::var("PARKING_RESERVED_SPOTS") {
            self.reserved_spots = split_csv(&spots);
        }
        if let Ok(cmd) = std::env::var("PARKING_DETECTOR_CMD") {
            let parts: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
            if !parts.is_empty() {
                self.detector.command = Some(parts);
            }
        }
        if let Ok(frame) = std::env::var("PARKING_FRAME_PATH") {
            if !frame.trim().is_empty() {
                self.detector.frame_path = PathBuf::from(frame);
            }
        }
        if let Ok(timeout) = std::env::var("PARKING_DETECTOR_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("PARKING_DETECTOR_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.detector.timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let reserved = self.reserved_set()?;
        self.reserved_spots = reserved.ids().map(str::to_string).collect();

        if matches!(&self.detector.command, Some(cmd) if cmd.is_empty()) {
            return Err(anyhow!("detector command must not be empty"));
        }
        if self.detector.timeout.is_zero() {
            return Err(anyhow!("detector timeout must be greater than zero"));
        }
        if self.refresh_queue_capacity == 0 {
            return Err(anyhow!("refresh queue capacity must be greater than zero"));
        }
        Ok(())
    }

    pub fn reserved_set(&self) -> Result<ReservedSet> {
        ReservedSet::new(&self.reserved_spots)
    }
}

fn read_config_file(path: &Path) -> Result<ParkingConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
