//! Detector contract.
//!
//! The detector is an opaque collaborator: given a frame it returns labeled
//! axis-aligned regions ("entry", "free", "occupied") with a confidence score.
//! Backends only report geometry; occupancy is decided by reconciliation.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{CommandBackend, StubBackend};
pub use registry::BackendRegistry;
pub use result::{DetectionBatch, RawDetection};
