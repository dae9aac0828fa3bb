use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

use crate::detect::DetectionBatch;
use crate::reconcile::reconcile;
use crate::{OccupancyRecord, OccupancyStore, ParkingError, ReservedSet, Result};

/// The single shared mutable resource: the persisted record plus the lock that
/// serializes every load -> change -> save sequence against it.
///
/// Reads (`snapshot`) take no lock; stores guarantee atomic replacement.
pub struct SharedOccupancy {
    store: Arc<dyn OccupancyStore>,
    reserved: ReservedSet,
    write_lock: Mutex<()>,
}

impl SharedOccupancy {
    pub fn new(store: Arc<dyn OccupancyStore>, reserved: ReservedSet) -> Self {
        Self {
            store,
            reserved,
            write_lock: Mutex::new(()),
        }
    }

    pub fn reserved(&self) -> &ReservedSet {
        &self.reserved
    }

    pub fn snapshot(&self) -> Result<OccupancyRecord> {
        self.store.load()?.ok_or(ParkingError::NoData)
    }

    /// Apply `change` to the current record and persist it. Nothing is saved when
    /// `change` fails.
    pub fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut OccupancyRecord) -> Result<T>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ParkingError::Storage("occupancy write lock poisoned".into()))?;
        let mut record = self.store.load()?.ok_or(ParkingError::NoData)?;
        let out = change(&mut record)?;
        self.store.save(&record)?;
        Ok(out)
    }

    /// Reconcile `batch` against whatever record is persisted right now and save
    /// the result. Creates the first record when none exists.
    pub fn apply_detections(
        &self,
        batch: &DetectionBatch,
        timestamp: DateTime<Utc>,
    ) -> Result<OccupancyRecord> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ParkingError::Storage("occupancy write lock poisoned".into()))?;
        let previous = self.store.load()?;
        let next = reconcile(previous.as_ref(), batch, &self.reserved, timestamp);
        self.store.save(&next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RawDetection;
    use crate::test_support::*;
    use crate::{InMemoryOccupancyStore, SpotState};

    fn shared(store: InMemoryOccupancyStore) -> SharedOccupancy {
        SharedOccupancy::new(Arc::new(store), ReservedSet::default())
    }

    #[test]
    fn snapshot_without_record_is_no_data() {
        let state = shared(InMemoryOccupancyStore::new());
        assert!(matches!(state.snapshot(), Err(ParkingError::NoData)));
        assert!(matches!(
            state.mutate(|_| Ok(())),
            Err(ParkingError::NoData)
        ));
    }

    #[test]
    fn failed_mutation_is_not_persisted() -> anyhow::Result<()> {
        let state = shared(InMemoryOccupancyStore::with_record(record(
            vec![spot("spot_1", SpotState::Free, 0)],
            vec![],
        )));
        let res: Result<()> = state.mutate(|rec| {
            rec.spots[0].state = SpotState::Occupied;
            Err(ParkingError::UnknownSpot("spot_9".into()))
        });
        assert!(res.is_err());
        assert_eq!(state.snapshot()?.spots[0].state, SpotState::Free);
        Ok(())
    }

    #[test]
    fn apply_detections_creates_then_merges() -> anyhow::Result<()> {
        let state = shared(InMemoryOccupancyStore::new());
        let batch = DetectionBatch::new(vec![
            RawDetection::new("free", [0.0, 0.0, 10.0, 10.0], 0.9),
            RawDetection::new("free", [20.0, 0.0, 30.0, 10.0], 0.9),
        ]);
        state.apply_detections(&batch, ts())?;
        state.mutate(|rec| {
            rec.spots[1].state = SpotState::Occupied;
            Ok(())
        })?;
        let merged = state.apply_detections(&batch, ts())?;
        assert_eq!(merged.spots[1].state, SpotState::Occupied);
        assert_eq!(state.snapshot()?, merged);
        Ok(())
    }
}
