use std::path::Path;

use anyhow::Result;

use super::result::DetectionBatch;

/// Detector backend trait.
///
/// Implementations may be slow and blocking (model inference, subprocesses).
/// They are only ever called from the refresh worker or a one-shot CLI, never
/// while the record write lock is held.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on the frame at `frame`.
    ///
    /// Returned regions are in detector order; that order is significant downstream.
    fn detect(&mut self, frame: &Path) -> Result<DetectionBatch>;
}
