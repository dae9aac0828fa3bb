//! Merge of a fresh detection batch into the last persisted record.
//!
//! Detection only (re)discovers geometry. Occupancy is sticky:
//!
//! - a spot id that already exists keeps its previous state;
//! - a spot id seen for the first time takes its state from the detected label;
//! - a reserved spot id always takes its previous state (`Free` if it had none),
//!   even on first appearance.
//!
//! Spot ids are assigned `spot_1, spot_2, ...` in the order the detector returned
//! the regions, not by position in the frame. A detector that reorders its output
//! between runs will move an id onto a different physical spot.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::detect::{DetectionBatch, RawDetection};
use crate::{BBox, EntryPoint, OccupancyRecord, ReservedSet, Spot, SpotState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    Entry,
    Spot(SpotState),
}

/// Classify a detector label. `None` means the region is discarded.
pub fn classify_label(label: &str) -> Option<RegionKind> {
    let label = label.to_lowercase();
    if label.contains("entry") {
        Some(RegionKind::Entry)
    } else if label.contains("occupied") {
        Some(RegionKind::Spot(SpotState::Occupied))
    } else if label.contains("free") {
        Some(RegionKind::Spot(SpotState::Free))
    } else {
        None
    }
}

pub fn spot_id(ordinal: usize) -> String {
    format!("spot_{}", ordinal)
}

fn round_confidence(confidence: f64) -> f64 {
    (confidence * 100.0).round() / 100.0
}

/// Build the next record from `previous` (absent on first run) and `batch`.
pub fn reconcile(
    previous: Option<&OccupancyRecord>,
    batch: &DetectionBatch,
    reserved: &ReservedSet,
    timestamp: DateTime<Utc>,
) -> OccupancyRecord {
    let prior: HashMap<&str, SpotState> = previous
        .map(|rec| {
            rec.spots
                .iter()
                .map(|s| (s.id.as_str(), s.state))
                .collect()
        })
        .unwrap_or_default();

    let mut entry_points = Vec::new();
    let mut spots = Vec::new();

    for det in &batch.detections {
        let Some(kind) = classify_label(&det.label) else {
            log::debug!("discarding detection with label '{}'", det.label);
            continue;
        };
        match kind {
            RegionKind::Entry => entry_points.push(entry_point(det)),
            RegionKind::Spot(detected) => {
                let id = spot_id(spots.len() + 1);
                let state = if reserved.contains(&id) {
                    prior.get(id.as_str()).copied().unwrap_or(SpotState::Free)
                } else {
                    prior.get(id.as_str()).copied().unwrap_or(detected)
                };
                spots.push(Spot {
                    id,
                    state,
                    bbox: BBox::from_detector(det.bbox),
                    confidence: round_confidence(det.confidence),
                });
            }
        }
    }

    OccupancyRecord::new(timestamp, entry_points, spots)
}

fn entry_point(det: &RawDetection) -> EntryPoint {
    EntryPoint {
        label: det.label.to_lowercase(),
        bbox: BBox::from_detector(det.bbox),
        confidence: round_confidence(det.confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ts;

    fn det(label: &str, x1: f64) -> RawDetection {
        RawDetection::new(label, [x1, 50.0, x1 + 80.0, 210.0], 0.876)
    }

    fn batch(labels: &[(&str, f64)]) -> DetectionBatch {
        DetectionBatch::new(labels.iter().map(|(l, x)| det(l, *x)).collect())
    }

    fn states(rec: &OccupancyRecord) -> Vec<(String, SpotState)> {
        rec.spots.iter().map(|s| (s.id.clone(), s.state)).collect()
    }

    #[test]
    fn labels_classify_with_occupied_before_free() {
        assert_eq!(classify_label("Entry_Gate"), Some(RegionKind::Entry));
        assert_eq!(
            classify_label("space-occupied"),
            Some(RegionKind::Spot(SpotState::Occupied))
        );
        assert_eq!(
            classify_label("FREE"),
            Some(RegionKind::Spot(SpotState::Free))
        );
        assert_eq!(
            classify_label("free_or_occupied"),
            Some(RegionKind::Spot(SpotState::Occupied))
        );
        assert_eq!(classify_label("car"), None);
    }

    #[test]
    fn first_run_assigns_ids_in_detector_order() {
        let b = batch(&[
            ("occupied", 300.0),
            ("entry", 0.0),
            ("free", 100.0),
            ("pedestrian", 50.0),
            ("free", 200.0),
        ]);
        let rec = reconcile(None, &b, &ReservedSet::default(), ts());
        assert_eq!(
            states(&rec),
            vec![
                ("spot_1".to_string(), SpotState::Occupied),
                ("spot_2".to_string(), SpotState::Free),
                ("spot_3".to_string(), SpotState::Free),
            ]
        );
        // Detector order, not spatial order.
        assert_eq!(rec.spots[0].bbox.x1, 300);
        assert_eq!(rec.entry_points.len(), 1);
        assert_eq!(rec.timestamp, ts());
    }

    #[test]
    fn geometry_is_truncated_and_confidence_rounded() {
        let b = DetectionBatch::new(vec![RawDetection::new(
            "free",
            [10.9, 20.5, 90.1, 200.99],
            0.876,
        )]);
        let rec = reconcile(None, &b, &ReservedSet::default(), ts());
        assert_eq!(rec.spots[0].bbox, BBox::new(10, 20, 90, 200));
        assert_eq!(rec.spots[0].confidence, 0.88);
    }

    #[test]
    fn established_state_survives_contrary_detection() {
        let first = reconcile(
            None,
            &batch(&[("free", 0.0), ("occupied", 100.0)]),
            &ReservedSet::default(),
            ts(),
        );
        let second = reconcile(
            Some(&first),
            &batch(&[("occupied", 0.0), ("free", 100.0), ("occupied", 200.0)]),
            &ReservedSet::default(),
            ts(),
        );
        assert_eq!(
            states(&second),
            vec![
                ("spot_1".to_string(), SpotState::Free),
                ("spot_2".to_string(), SpotState::Occupied),
                ("spot_3".to_string(), SpotState::Occupied),
            ]
        );
    }

    #[test]
    fn reserved_spot_ignores_detection_on_first_appearance() -> anyhow::Result<()> {
        let reserved = ReservedSet::new(["spot_1"])?;
        let rec = reconcile(
            None,
            &batch(&[("occupied", 0.0), ("occupied", 100.0)]),
            &reserved,
            ts(),
        );
        assert_eq!(rec.spots[0].state, SpotState::Free);
        assert_eq!(rec.spots[1].state, SpotState::Occupied);
        Ok(())
    }

    #[test]
    fn reserved_spot_keeps_previous_state() -> anyhow::Result<()> {
        let reserved = ReservedSet::new(["spot_1"])?;
        let mut prev = reconcile(None, &batch(&[("free", 0.0)]), &reserved, ts());
        prev.spots[0].state = SpotState::Occupied;
        let next = reconcile(Some(&prev), &batch(&[("free", 0.0)]), &reserved, ts());
        assert_eq!(next.spots[0].state, SpotState::Occupied);
        Ok(())
    }

    #[test]
    fn reconciliation_is_idempotent() -> anyhow::Result<()> {
        let reserved = ReservedSet::new(["spot_1"])?;
        let b = batch(&[
            ("entry", 5.0),
            ("occupied", 0.0),
            ("free", 100.0),
            ("occupied", 200.0),
        ]);
        let once = reconcile(None, &b, &reserved, ts());
        let twice = reconcile(Some(&once), &b, &reserved, ts());
        assert_eq!(once, twice);
        Ok(())
    }

    #[test]
    fn vanished_spots_are_dropped_and_ids_recycled() {
        let first = reconcile(
            None,
            &batch(&[("free", 0.0), ("occupied", 100.0), ("occupied", 200.0)]),
            &ReservedSet::default(),
            ts(),
        );
        let second = reconcile(
            Some(&first),
            &batch(&[("occupied", 0.0)]),
            &ReservedSet::default(),
            ts(),
        );
        assert_eq!(states(&second), vec![("spot_1".to_string(), SpotState::Free)]);
    }
}
