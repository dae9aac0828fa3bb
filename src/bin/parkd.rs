//! parkd - parking occupancy daemon
//!
//! This daemon:
//! 1. Opens the persisted occupancy record
//! 2. Starts the background refresh worker (when a detector command is configured)
//! 3. Serves the HTTP API until Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use parking_kernel::{
    api::{ApiConfig, ApiServer},
    BackendRegistry, CommandBackend, JsonFileStore, NoopRefresh, ParkingConfig, ParkingService,
    RefreshConfig, RefreshScheduler, RefreshTrigger, SharedOccupancy,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ParkingConfig::load()?;
    let store = JsonFileStore::new(&config.record_path);
    let state = Arc::new(SharedOccupancy::new(
        Arc::new(store),
        config.reserved_set()?,
    ));
    match state.snapshot() {
        Ok(record) => log::info!(
            "loaded occupancy record from {} ({} spots)",
            config.record_path.display(),
            record.spots.len()
        ),
        Err(err) => log::warn!(
            "no usable occupancy record at {}: {}",
            config.record_path.display(),
            err
        ),
    }

    let mut registry = BackendRegistry::new();
    if let Some(command) = &config.detector.command {
        registry.register(CommandBackend::from_command_line(
            command,
            config.detector.timeout,
        )?);
    }

    let trigger = match registry.default_backend() {
        Some(detector) => {
            log::info!(
                "refresh worker using detector '{}' on frame {}",
                registry.default_name().unwrap_or("unknown"),
                config.detector.frame_path.display()
            );
            let trigger = RefreshTrigger::spawn(
                state.clone(),
                detector,
                RefreshConfig {
                    frame_path: config.detector.frame_path.clone(),
                    queue_capacity: config.refresh_queue_capacity,
                },
            )?;
            Some(Arc::new(trigger))
        }
        None => {
            log::warn!("no detector command configured; refresh after confirm/reset is disabled");
            None
        }
    };
    let scheduler: Arc<dyn RefreshScheduler> = match &trigger {
        Some(trigger) => trigger.clone(),
        None => Arc::new(NoopRefresh),
    };

    let service = Arc::new(ParkingService::new(state, scheduler));
    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, service).spawn()?;
    log::info!("parking api listening on {}", api_handle.addr);
    log::info!(
        "parkd running. reserved spots: [{}]",
        config.reserved_spots.join(", ")
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("parkd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    if let Some(trigger) = trigger {
        log::info!("waiting for pending refreshes...");
        trigger.stop()?;
    }

    Ok(())
}
