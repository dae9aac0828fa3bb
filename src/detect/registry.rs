use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::result::DetectionBatch;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn DetectorBackend>>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.default_name
            .as_ref()
            .and_then(|name| self.backends.get(name).cloned())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Run detection with the default backend.
    pub fn detect(&self, frame: &Path) -> Result<DetectionBatch> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.detect(frame)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawDetection, StubBackend};

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        assert!(registry.default_backend().is_none());
        assert!(registry.detect(Path::new("frame.jpg")).is_err());

        let batch = DetectionBatch::new(vec![RawDetection::new("free", [0.0, 0.0, 1.0, 1.0], 0.9)]);
        registry.register(StubBackend::new(batch.clone()));
        assert_eq!(registry.default_name(), Some("stub"));
        assert_eq!(registry.detect(Path::new("frame.jpg"))?, batch);
        Ok(())
    }

    #[test]
    fn default_backend_is_shared_with_callers() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::failing("no camera"));

        let backend = registry.default_backend().expect("stub registered");
        let err = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?
            .detect(Path::new("frame.jpg"))
            .unwrap_err();
        assert!(err.to_string().contains("no camera"));
        assert!(registry.detect(Path::new("frame.jpg")).is_err());
        Ok(())
    }
}
