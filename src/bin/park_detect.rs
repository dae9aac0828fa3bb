//! park_detect - one-shot detection pass
//!
//! Runs the detector once (or reads a saved detection batch), reconciles it into
//! the persisted occupancy record and prints the resulting status.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_kernel::{
    BackendRegistry, CommandBackend, DetectionBatch, JsonFileStore, ReservedSet, SharedOccupancy,
};

#[derive(Parser, Debug)]
#[command(
    name = "park_detect",
    about = "Run one detection pass and merge it into the occupancy record"
)]
struct Args {
    /// Occupancy record to update
    #[arg(long, env = "PARKING_RECORD_PATH", default_value = "output/occupancy.json")]
    record_path: PathBuf,

    /// Frame handed to the detector
    #[arg(long, env = "PARKING_FRAME_PATH", default_value = "static/parking.jpg")]
    frame: PathBuf,

    /// Detector command line; the frame path is appended as the last argument
    #[arg(long, env = "PARKING_DETECTOR_CMD")]
    detector_cmd: Option<String>,

    /// Read a detection batch (JSON array) from this file instead of running the detector
    #[arg(long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Comma-separated reserved spot ids
    #[arg(long, env = "PARKING_RESERVED_SPOTS", default_value = "spot_1")]
    reserved: String,

    /// Detector timeout in seconds
    #[arg(long, env = "PARKING_DETECTOR_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let reserved = ReservedSet::new(
        args.reserved
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty()),
    )?;

    let batch = match (&args.input, &args.detector_cmd) {
        (Some(path), _) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("failed to read detections {}", path.display()))?;
            serde_json::from_slice::<DetectionBatch>(&raw)
                .with_context(|| format!("invalid detections {}", path.display()))?
        }
        (None, Some(cmd)) => {
            let command: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
            let mut registry = BackendRegistry::new();
            registry.register(CommandBackend::from_command_line(
                &command,
                Duration::from_secs(args.timeout_secs),
            )?);
            registry.detect(&args.frame)?
        }
        (None, None) => {
            return Err(anyhow!(
                "either --detector-cmd (or PARKING_DETECTOR_CMD) or --input must be given"
            ))
        }
    };
    log::info!("detector returned {} regions", batch.len());

    let state = SharedOccupancy::new(Arc::new(JsonFileStore::new(&args.record_path)), reserved);
    let record = state.apply_detections(&batch, Utc::now())?;
    let summary = record.summary(state.reserved());
    log::info!("occupancy record written to {}", args.record_path.display());

    println!(
        "spots={} free={} occupied={} reserved={} entry_points={} full={}",
        summary.total,
        summary.free,
        summary.occupied,
        summary.reserved,
        record.entry_points.len(),
        record.is_full()
    );
    for spot in &record.spots {
        let tag = if state.reserved().contains(&spot.id) {
            " (reserved)"
        } else {
            ""
        };
        println!("  {:<10} {}{}", spot.id, spot.state, tag);
    }
    Ok(())
}
