//! Spot selection per vehicle class.
//!
//! Neighbours are list neighbours in the record's spot order, not geometric
//! neighbours. A spot's neighbour count includes reserved spots that are free.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::{OccupancyRecord, ReservedSet, Spot};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    #[default]
    Compact,
    Suv,
    Muv,
    Sedan,
    Luxury,
}

impl VehicleClass {
    /// Unrecognised or empty input falls back to `Compact`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "suv" => VehicleClass::Suv,
            "muv" => VehicleClass::Muv,
            "sedan" => VehicleClass::Sedan,
            "luxury" => VehicleClass::Luxury,
            _ => VehicleClass::Compact,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Compact => "compact",
            VehicleClass::Suv => "suv",
            VehicleClass::Muv => "muv",
            VehicleClass::Sedan => "sedan",
            VehicleClass::Luxury => "luxury",
        }
    }
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoCandidate {
    NoFreeSpots,
    NoPremiumSpot,
}

impl NoCandidate {
    pub fn message(&self) -> &'static str {
        match self {
            NoCandidate::NoFreeSpots => "No free spots available.",
            NoCandidate::NoPremiumSpot => "No premium spots with both neighbours free.",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Recommendation {
    Selected {
        spot: Spot,
        vehicle_class: VehicleClass,
    },
    NoCandidate {
        reason: NoCandidate,
        vehicle_class: VehicleClass,
    },
}

impl Recommendation {
    pub fn spot(&self) -> Option<&Spot> {
        match self {
            Recommendation::Selected { spot, .. } => Some(spot),
            Recommendation::NoCandidate { .. } => None,
        }
    }

    pub fn vehicle_class(&self) -> VehicleClass {
        match self {
            Recommendation::Selected { vehicle_class, .. }
            | Recommendation::NoCandidate { vehicle_class, .. } => *vehicle_class,
        }
    }
}

/// A free, non-reserved spot with its position in the record.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub index: usize,
    pub spot: &'a Spot,
    pub neighbor_free_count: u8,
}

/// Number of free spots at `index - 1` and `index + 1`, bounded by the list ends.
pub fn neighbor_free_count(spots: &[Spot], index: usize) -> u8 {
    let left = index > 0 && spots[index - 1].is_free();
    let right = index + 1 < spots.len() && spots[index + 1].is_free();
    u8::from(left) + u8::from(right)
}

/// Candidates in record order, then sorted by distance to the first entry point
/// when one exists.
pub fn rank_candidates<'a>(record: &'a OccupancyRecord, reserved: &ReservedSet) -> Vec<Candidate<'a>> {
    let mut ranked: Vec<Candidate<'a>> = record
        .spots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_free() && !reserved.contains(&s.id))
        .map(|(index, spot)| Candidate {
            index,
            spot,
            neighbor_free_count: neighbor_free_count(&record.spots, index),
        })
        .collect();

    if let Some(entry) = record.entry_points.first() {
        ranked.sort_by_key(|c| entry.bbox.corner_distance_sq(&c.spot.bbox));
    }
    ranked
}

pub fn recommend(
    record: &OccupancyRecord,
    vehicle_class: VehicleClass,
    reserved: &ReservedSet,
) -> Recommendation {
    let ranked = rank_candidates(record, reserved);
    let Some(nearest) = ranked.first().copied() else {
        return Recommendation::NoCandidate {
            reason: NoCandidate::NoFreeSpots,
            vehicle_class,
        };
    };

    let chosen = match vehicle_class {
        VehicleClass::Compact | VehicleClass::Muv => nearest,
        VehicleClass::Suv | VehicleClass::Sedan => {
            let mut roomy = ranked.clone();
            roomy.sort_by_key(|c| (Reverse(c.neighbor_free_count), c.spot.bbox.x1));
            roomy
                .into_iter()
                .find(|c| c.neighbor_free_count >= 1)
                .unwrap_or(nearest)
        }
        VehicleClass::Luxury => match ranked.iter().find(|c| c.neighbor_free_count == 2) {
            Some(c) => *c,
            None => {
                return Recommendation::NoCandidate {
                    reason: NoCandidate::NoPremiumSpot,
                    vehicle_class,
                }
            }
        },
    };

    Recommendation::Selected {
        spot: chosen.spot.clone(),
        vehicle_class,
    }
}
