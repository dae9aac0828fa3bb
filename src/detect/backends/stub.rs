use std::path::Path;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionBatch;

/// Stub backend for testing. Replays a fixed batch, or fails every call.
pub struct StubBackend {
    batch: DetectionBatch,
    failure: Option<String>,
    calls: usize,
}

impl StubBackend {
    pub fn new(batch: DetectionBatch) -> Self {
        Self {
            batch,
            failure: None,
            calls: 0,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            batch: DetectionBatch::default(),
            failure: Some(message.into()),
            calls: 0,
        }
    }

    pub fn set_batch(&mut self, batch: DetectionBatch) {
        self.batch = batch;
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(DetectionBatch::default())
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Path) -> Result<DetectionBatch> {
        self.calls += 1;
        match &self.failure {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self.batch.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RawDetection;

    #[test]
    fn replays_current_batch_and_counts_calls() -> Result<()> {
        let mut stub = StubBackend::default();
        assert!(stub.detect(Path::new("a.jpg"))?.is_empty());

        stub.set_batch(DetectionBatch::new(vec![RawDetection::new(
            "occupied",
            [0.0, 0.0, 10.0, 10.0],
            0.5,
        )]));
        assert_eq!(stub.detect(Path::new("a.jpg"))?.len(), 1);
        assert_eq!(stub.calls(), 2);
        Ok(())
    }
}
