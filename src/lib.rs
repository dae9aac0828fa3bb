//! Parking Occupancy Kernel
//!
//! This crate tracks occupancy of a fixed set of parking spots and recommends a spot
//! to an arriving vehicle based on its size class.
//!
//! # Architecture
//!
//! The detector is an external collaborator: it only ever rediscovers spot geometry.
//! Occupancy is operator-confirmed truth and is owned by the kernel:
//!
//! 1. **Sticky state**: once a spot id has a state, detection never overrides it.
//! 2. **Reserved spots**: detection never sets a reserved spot's state, and clients
//!    cannot force-occupy one.
//! 3. **Serialized writes**: every read-modify-write of the record runs under one lock.
//! 4. **Decoupled refresh**: detector runs after a mutation never block or fail it.
//!
//! # Module Structure
//!
//! - `storage`: persisted record (JSON file, in-memory)
//! - `state`: serialized read-modify-write over a store
//! - `reconcile`: merge of a detection batch into the last record
//! - `recommend`: spot selection per vehicle class
//! - `service`: status, recommend, confirm and reset operations
//! - `refresh`: background detector invocation after mutations
//! - `detect`: detector backends
//! - `api`: HTTP transport
//! - `config`: file and environment configuration

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod recommend;
pub mod reconcile;
pub mod refresh;
pub mod service;
pub mod state;
pub mod storage;

pub use detect::{
    BackendRegistry, CommandBackend, DetectionBatch, DetectorBackend, RawDetection, StubBackend,
};
pub use config::{DetectorSettings, ParkingConfig};
pub use error::{ParkingError, Result};
pub use recommend::{recommend, NoCandidate, Recommendation, VehicleClass};
pub use reconcile::reconcile;
pub use refresh::{
    refresh_once, NoopRefresh, RefreshConfig, RefreshReason, RefreshScheduler, RefreshStats,
    RefreshStatsSnapshot, RefreshTrigger,
};
pub use service::{ConfirmOutcome, ParkingService, StatusReport};
pub use state::SharedOccupancy;
pub use storage::{InMemoryOccupancyStore, JsonFileStore, OccupancyStore};

// -------------------- Geometry --------------------

/// Axis-aligned pixel rectangle. Serialized as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Truncates detector coordinates toward zero.
    pub fn from_detector(coords: [f64; 4]) -> Self {
        Self {
            x1: coords[0] as i32,
            y1: coords[1] as i32,
            x2: coords[2] as i32,
            y2: coords[3] as i32,
        }
    }

    /// Squared distance between the top-left corners of two boxes.
    pub fn corner_distance_sq(&self, other: &BBox) -> i64 {
        let dx = i64::from(self.x1) - i64::from(other.x1);
        let dy = i64::from(self.y1) - i64::from(other.y1);
        dx * dx + dy * dy
    }
}

impl From<[i32; 4]> for BBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [i32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

// -------------------- Spots --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotState {
    Free,
    Occupied,
}

impl SpotState {
    pub fn from_occupied(occupied: bool) -> Self {
        if occupied {
            SpotState::Occupied
        } else {
            SpotState::Free
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpotState::Free => "free",
            SpotState::Occupied => "occupied",
        }
    }
}

impl std::fmt::Display for SpotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    /// Order-derived label, e.g. "spot_3".
    pub id: String,
    pub state: SpotState,
    pub bbox: BBox,
    pub confidence: f64,
}

impl Spot {
    pub fn is_free(&self) -> bool {
        self.state == SpotState::Free
    }
}

/// Detected ingress marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub label: String,
    pub bbox: BBox,
    pub confidence: f64,
}

// -------------------- Occupancy Record --------------------

/// The single persisted occupancy record. Spot order is significant: it drives
/// both id assignment and neighbour adjacency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
    #[serde(default)]
    pub spots: Vec<Spot>,
}

impl OccupancyRecord {
    pub fn new(timestamp: DateTime<Utc>, entry_points: Vec<EntryPoint>, spots: Vec<Spot>) -> Self {
        Self {
            timestamp,
            entry_points,
            spots,
        }
    }

    /// Case-insensitive lookup.
    pub fn spot(&self, id: &str) -> Option<&Spot> {
        let id = normalize_spot_id(id);
        self.spots.iter().find(|s| s.id.to_lowercase() == id)
    }

    pub fn spot_mut(&mut self, id: &str) -> Option<&mut Spot> {
        let id = normalize_spot_id(id);
        self.spots.iter_mut().find(|s| s.id.to_lowercase() == id)
    }

    /// True when no spot is free. An empty lot counts as full.
    pub fn is_full(&self) -> bool {
        self.spots.iter().all(|s| s.state == SpotState::Occupied)
    }

    pub fn summary(&self, reserved: &ReservedSet) -> OccupancySummary {
        let free = self.spots.iter().filter(|s| s.is_free()).count();
        OccupancySummary {
            total: self.spots.len(),
            free,
            occupied: self.spots.len() - free,
            reserved: self
                .spots
                .iter()
                .filter(|s| reserved.contains(&s.id))
                .count(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancySummary {
    pub total: usize,
    pub free: usize,
    pub occupied: usize,
    pub reserved: usize,
}

// -------------------- Reserved Spots --------------------

pub fn normalize_spot_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Spot ids are only ever generated as `spot_<n>`; anything else can never match.
pub fn validate_spot_id(id: &str) -> anyhow::Result<()> {
    static SPOT_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SPOT_ID_RE.get_or_init(|| regex::Regex::new(r"^spot_[0-9]{1,6}$").unwrap());

    if !re.is_match(&normalize_spot_id(id)) {
        return Err(anyhow!(
            "reserved spot id '{}' must match ^spot_[0-9]{{1,6}}$",
            id
        ));
    }
    Ok(())
}

/// Spot ids excluded from allocation and from forced occupation.
/// Static configuration, never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReservedSet {
    ids: BTreeSet<String>,
}

impl ReservedSet {
    pub fn new<I, S>(ids: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = BTreeSet::new();
        for id in ids {
            validate_spot_id(id.as_ref())?;
            out.insert(normalize_spot_id(id.as_ref()));
        }
        Ok(Self { ids: out })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(&normalize_spot_id(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn bbox_serializes_as_array() -> anyhow::Result<()> {
        let b = BBox::new(1, 2, 3, 4);
        assert_eq!(serde_json::to_string(&b)?, "[1,2,3,4]");
        let back: BBox = serde_json::from_str("[5,6,7,8]")?;
        assert_eq!(back, BBox::new(5, 6, 7, 8));
        Ok(())
    }

    #[test]
    fn detector_coordinates_truncate_toward_zero() {
        let b = BBox::from_detector([10.9, 20.2, 99.99, -0.7]);
        assert_eq!(b, BBox::new(10, 20, 99, 0));
    }

    #[test]
    fn record_schema_uses_lowercase_states() -> anyhow::Result<()> {
        let rec = record(vec![spot("spot_1", SpotState::Occupied, 0)], vec![entry(0, 0)]);
        let value = serde_json::to_value(&rec)?;
        assert_eq!(value["spots"][0]["state"], "occupied");
        assert_eq!(value["spots"][0]["bbox"], serde_json::json!([0, 100, 80, 260]));
        assert!(value["timestamp"].as_str().is_some());
        assert_eq!(value["entry_points"][0]["label"], "entry");
        Ok(())
    }

    #[test]
    fn spot_lookup_is_case_insensitive() {
        let mut rec = record(vec![spot("spot_2", SpotState::Free, 0)], vec![]);
        assert!(rec.spot(" SPOT_2 ").is_some());
        assert!(rec.spot_mut("Spot_2").is_some());
        assert!(rec.spot("spot_3").is_none());
    }

    #[test]
    fn empty_lot_reports_full() {
        assert!(record(vec![], vec![]).is_full());
        let rec = record(
            vec![
                spot("spot_1", SpotState::Occupied, 0),
                spot("spot_2", SpotState::Free, 100),
            ],
            vec![],
        );
        assert!(!rec.is_full());
    }

    #[test]
    fn summary_counts_reserved_spots_present_in_record() -> anyhow::Result<()> {
        let reserved = ReservedSet::new(["spot_1", "spot_9"])?;
        let rec = record(
            vec![
                spot("spot_1", SpotState::Free, 0),
                spot("spot_2", SpotState::Occupied, 100),
                spot("spot_3", SpotState::Free, 200),
            ],
            vec![],
        );
        let summary = rec.summary(&reserved);
        assert_eq!(
            summary,
            OccupancySummary {
                total: 3,
                free: 2,
                occupied: 1,
                reserved: 1,
            }
        );
        Ok(())
    }

    #[test]
    fn reserved_set_normalizes_and_validates() -> anyhow::Result<()> {
        let reserved = ReservedSet::new(["SPOT_1 "])?;
        assert!(reserved.contains("spot_1"));
        assert!(reserved.contains("Spot_1"));
        assert!(!reserved.contains("spot_10"));
        assert!(ReservedSet::new(["handicap"]).is_err());
        assert!(ReservedSet::new(["spot_"]).is_err());
        Ok(())
    }
}
