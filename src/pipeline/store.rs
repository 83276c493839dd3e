//! Durable resumption cursor: `document id → pages confirmed delivered`.
//!
//! The file is a flat JSON object rewritten in full on every save, through a
//! temp file in the same directory and an atomic rename. A missing or
//! unreadable file means "nothing delivered yet"; it is never an error.
//!
//! Cursors only move forward. [`ProgressStore::commit`] reloads the file,
//! keeps the larger of the stored and the new count, and writes it back
//! under a lock, so two runs sharing a work directory in one process can't
//! roll each other's cursors back.

use crate::error::DeliveryError;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// In-memory snapshot of the progress file.
pub type ProgressMap = BTreeMap<String, u64>;

/// The progress file of one work directory.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProgressStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole map. Missing or corrupt → empty.
    pub fn load(&self) -> ProgressMap {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ProgressMap::new(),
            Err(e) => {
                warn!(
                    "Progress file {} unreadable ({}); starting fresh",
                    self.path.display(),
                    e
                );
                return ProgressMap::new();
            }
        };
        match serde_json::from_slice::<ProgressMap>(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "Progress file {} is corrupt ({}); starting fresh",
                    self.path.display(),
                    e
                );
                ProgressMap::new()
            }
        }
    }

    /// Cursor for one document; 0 when unknown.
    pub fn cursor(&self, document_id: &str) -> u64 {
        self.load().get(document_id).copied().unwrap_or(0)
    }

    /// Replace the file with `map`.
    pub fn save(&self, map: &ProgressMap) -> Result<(), DeliveryError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.write(map)
    }

    /// Record that `confirmed` pages of `document_id` are delivered.
    ///
    /// Returns the cursor now on disk, which is never lower than before.
    pub fn commit(&self, document_id: &str, confirmed: u64) -> Result<u64, DeliveryError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut map = self.load();
        let entry = map.entry(document_id.to_string()).or_insert(0);
        if confirmed < *entry {
            warn!(
                "Ignoring cursor regression for '{}': {} < {}",
                document_id, confirmed, *entry
            );
        }
        *entry = (*entry).max(confirmed);
        let stored = *entry;
        self.write(&map)?;
        debug!("Progress '{}' → {}", document_id, stored);
        Ok(stored)
    }

    fn write(&self, map: &ProgressMap) -> Result<(), DeliveryError> {
        let write_err = |source| DeliveryError::ProgressWriteFailed {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(write_err)?;

        let json = serde_json::to_vec(map)
            .map_err(|e| DeliveryError::Internal(format!("progress serialisation: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}
