use serde::Serialize;
use std::sync::Arc;

use crate::recommend::{recommend, Recommendation, VehicleClass};
use crate::refresh::{RefreshReason, RefreshScheduler, RefreshStatsSnapshot};
use crate::{
    normalize_spot_id, OccupancyRecord, OccupancySummary, ParkingError, Result, SharedOccupancy,
    SpotState,
};

/// Record plus derived fields, as returned by `status`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub record: OccupancyRecord,
    pub is_full: bool,
    pub summary: OccupancySummary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfirmOutcome {
    pub spot_id: String,
    pub state: SpotState,
}

/// Foreground operations: status, recommend, confirm, reset.
///
/// Mutations persist through `SharedOccupancy` and then schedule a refresh. The
/// refresh outcome never reaches the caller.
pub struct ParkingService {
    state: Arc<SharedOccupancy>,
    refresh: Arc<dyn RefreshScheduler>,
}

impl ParkingService {
    pub fn new(state: Arc<SharedOccupancy>, refresh: Arc<dyn RefreshScheduler>) -> Self {
        Self { state, refresh }
    }

    pub fn state(&self) -> &Arc<SharedOccupancy> {
        &self.state
    }

    /// Counters from the background refresh worker, when one is running.
    pub fn refresh_stats(&self) -> Option<RefreshStatsSnapshot> {
        self.refresh.stats()
    }

    pub fn status(&self) -> Result<StatusReport> {
        let record = self.state.snapshot()?;
        Ok(StatusReport {
            is_full: record.is_full(),
            summary: record.summary(self.state.reserved()),
            record,
        })
    }

    /// `vehicle_class` is normalized leniently; unknown classes are treated as compact.
    pub fn recommend(&self, vehicle_class: &str) -> Result<Recommendation> {
        let record = self.state.snapshot()?;
        let class = VehicleClass::normalize(vehicle_class);
        log::info!("recommend called for vehicle class: {}", class);

        let out = recommend(&record, class, self.state.reserved());
        match &out {
            Recommendation::Selected { spot, .. } => {
                log::info!("recommended {} for {}", spot.id, class)
            }
            Recommendation::NoCandidate { reason, .. } => {
                log::info!("no recommendation for {}: {:?}", class, reason)
            }
        }
        Ok(out)
    }

    /// Mark a spot occupied or free. Reserved spots may be freed but never occupied.
    pub fn confirm(&self, spot_id: &str, occupied: bool) -> Result<ConfirmOutcome> {
        let id = normalize_spot_id(spot_id);
        let reserved = self.state.reserved();
        let target = SpotState::from_occupied(occupied);

        let res = self.state.mutate(|record| {
            if occupied && reserved.contains(&id) {
                return Err(ParkingError::ReservedSpotViolation(id.clone()));
            }
            let spot = record
                .spot_mut(&id)
                .ok_or_else(|| ParkingError::UnknownSpot(id.clone()))?;
            spot.state = target;
            Ok(ConfirmOutcome {
                spot_id: spot.id.clone(),
                state: target,
            })
        });

        match res {
            Ok(outcome) => {
                log::info!("spot {} marked as {}", outcome.spot_id, outcome.state);
                self.refresh.schedule(RefreshReason::Confirm);
                Ok(outcome)
            }
            Err(err) => {
                log::warn!("confirm {} -> {} rejected: {}", id, target, err);
                Err(err)
            }
        }
    }

    /// Free every spot, reserved ones included. Returns the number of spots reset.
    pub fn reset(&self) -> Result<usize> {
        let count = self.state.mutate(|record| {
            for spot in &mut record.spots {
                spot.state = SpotState::Free;
            }
            Ok(record.spots.len())
        })?;
        log::info!("all {} spots reset to free", count);
        self.refresh.schedule(RefreshReason::Reset);
        Ok(count)
    }
}
