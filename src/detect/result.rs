use serde::{Deserialize, Serialize};

/// One region as reported by the detector. Coordinates are raw pixel floats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub bbox: [f64; 4],
    pub confidence: f64,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, bbox: [f64; 4], confidence: f64) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence,
        }
    }
}

/// Unordered-by-geometry collection of regions, kept in the order the detector
/// returned them. Serialized as a bare JSON array.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionBatch {
    pub detections: Vec<RawDetection>,
}

impl DetectionBatch {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

impl From<Vec<RawDetection>> for DetectionBatch {
    fn from(detections: Vec<RawDetection>) -> Self {
        Self { detections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_parses_from_bare_array() -> anyhow::Result<()> {
        let raw = r#"[
            {"label": "Entry", "bbox": [10.0, 12.5, 40.0, 44.0], "confidence": 0.77},
            {"label": "free", "bbox": [100, 20, 180, 200], "confidence": 0.912}
        ]"#;
        let batch: DetectionBatch = serde_json::from_str(raw)?;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.detections[0].label, "Entry");
        assert_eq!(batch.detections[1].bbox, [100.0, 20.0, 180.0, 200.0]);
        Ok(())
    }
}
