use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::{OccupancyRecord, ParkingError, Result};

/// Latest-wins persistence of the single occupancy record. No business logic.
///
/// Implementations must make `save` atomic with respect to `load`: a reader sees
/// either the previous record or the new one, never a partial write.
pub trait OccupancyStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<OccupancyRecord>>;

    fn save(&self, record: &OccupancyRecord) -> Result<()>;
}

/// Pretty-printed JSON file, replaced atomically via temp file + rename.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl OccupancyStore for JsonFileStore {
    fn load(&self) -> Result<Option<OccupancyRecord>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_slice(&raw).map_err(|e| {
            ParkingError::MalformedState(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(Some(record))
    }

    fn save(&self, record: &OccupancyRecord) -> Result<()> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(&dir)?;
        let payload = serde_json::to_vec_pretty(record)
            .map_err(|e| ParkingError::Storage(format!("encode occupancy record: {}", e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| ParkingError::Storage(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOccupancyStore {
    record: RwLock<Option<OccupancyRecord>>,
}

impl InMemoryOccupancyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: OccupancyRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
        }
    }
}

impl OccupancyStore for InMemoryOccupancyStore {
    fn load(&self) -> Result<Option<OccupancyRecord>> {
        let guard = self
            .record
            .read()
            .map_err(|_| ParkingError::Storage("in-memory store lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn save(&self, record: &OccupancyRecord) -> Result<()> {
        let mut guard = self
            .record
            .write()
            .map_err(|_| ParkingError::Storage("in-memory store lock poisoned".into()))?;
        *guard = Some(record.clone());
        Ok(())
    }
}
