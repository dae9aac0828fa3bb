//! Background detector runs after mutations.
//!
//! `confirm`/`reset` only enqueue a request; they never wait for the detector and
//! never see its failures. The worker runs the detector outside the write lock and
//! then reconciles against whatever record is persisted when it writes back, so a
//! confirm that lands while the detector is running is not clobbered.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::detect::DetectorBackend;
use crate::{OccupancyRecord, ParkingError, SharedOccupancy};

pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshReason {
    Confirm,
    Reset,
    Manual,
}

/// Fire-and-forget refresh scheduling. Implementations must not block.
pub trait RefreshScheduler: Send + Sync {
    fn schedule(&self, reason: RefreshReason);

    /// Counters, when the scheduler keeps any.
    fn stats(&self) -> Option<RefreshStatsSnapshot> {
        None
    }
}

/// Scheduler used when no detector is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRefresh;

impl RefreshScheduler for NoopRefresh {
    fn schedule(&self, reason: RefreshReason) {
        log::debug!("refresh after {:?} skipped: no detector configured", reason);
    }
}

#[derive(Debug, Default)]
pub struct RefreshStats {
    scheduled: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStatsSnapshot {
    pub scheduled: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

impl RefreshStats {
    pub fn snapshot(&self) -> RefreshStatsSnapshot {
        RefreshStatsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RefreshConfig {
    /// Frame handed to the detector on every run.
    pub frame_path: PathBuf,
    /// Pending requests beyond this are dropped; a queued run already covers them.
    pub queue_capacity: usize,
}

/// Bounded queue plus one detached worker thread.
pub struct RefreshTrigger {
    tx: Mutex<Option<SyncSender<RefreshReason>>>,
    stats: Arc<RefreshStats>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshTrigger {
    pub fn spawn(
        state: Arc<SharedOccupancy>,
        detector: Arc<Mutex<dyn DetectorBackend>>,
        cfg: RefreshConfig,
    ) -> Result<Self> {
        if cfg.queue_capacity == 0 {
            return Err(anyhow!("refresh queue capacity must be greater than zero"));
        }
        let (tx, rx) = mpsc::sync_channel(cfg.queue_capacity);
        let stats = Arc::new(RefreshStats::default());
        let worker_stats = stats.clone();
        let join = std::thread::Builder::new()
            .name("parking-refresh".into())
            .spawn(move || run_worker(rx, state, detector, cfg.frame_path, worker_stats))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            stats,
            join: Mutex::new(Some(join)),
        })
    }

    /// Close the queue and wait for queued runs to finish.
    pub fn stop(&self) -> Result<()> {
        self.tx
            .lock()
            .map_err(|_| anyhow!("refresh sender lock poisoned"))?
            .take();
        let join = self
            .join
            .lock()
            .map_err(|_| anyhow!("refresh join lock poisoned"))?
            .take();
        if let Some(join) = join {
            join.join()
                .map_err(|_| anyhow!("refresh worker thread panicked"))?;
        }
        Ok(())
    }
}

impl RefreshScheduler for RefreshTrigger {
    fn schedule(&self, reason: RefreshReason) {
        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("refresh sender lock poisoned; dropping refresh");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let Some(tx) = guard.as_ref() else {
            log::debug!("refresh after {:?} dropped: worker stopped", reason);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match tx.try_send(reason) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::debug!("refresh after {:?} dropped: queue full", reason);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("refresh after {:?} dropped: worker gone", reason);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn stats(&self) -> Option<RefreshStatsSnapshot> {
        Some(self.stats.snapshot())
    }
}

fn run_worker(
    rx: Receiver<RefreshReason>,
    state: Arc<SharedOccupancy>,
    detector: Arc<Mutex<dyn DetectorBackend>>,
    frame_path: PathBuf,
    stats: Arc<RefreshStats>,
) {
    for reason in rx {
        match refresh_once(&state, &detector, &frame_path) {
            Ok(record) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                let summary = record.summary(state.reserved());
                log::info!(
                    "refresh after {:?} complete: spots={} free={} occupied={}",
                    reason,
                    summary.total,
                    summary.free,
                    summary.occupied
                );
            }
            Err(err) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("refresh after {:?} failed: {}", reason, err);
            }
        }
    }
    log::debug!("refresh worker exiting");
}

/// One detector run followed by reconciliation. Detector errors come back as
/// `DetectorFailure`.
pub fn refresh_once(
    state: &SharedOccupancy,
    detector: &Mutex<dyn DetectorBackend>,
    frame_path: &Path,
) -> crate::Result<OccupancyRecord> {
    let batch = {
        let mut guard = detector
            .lock()
            .map_err(|_| ParkingError::DetectorFailure("detector lock poisoned".into()))?;
        guard
            .detect(frame_path)
            .map_err(|e| ParkingError::DetectorFailure(format!("{:#}", e)))?
    };
    state.apply_detections(&batch, Utc::now())
}
