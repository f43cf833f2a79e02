//! Existence queries over <root>/snapshots.

use std::fs;

use super::SnapshotManager;
use crate::error::{Result, SnapshotError};
use crate::paths::{parse_snapshot_name, probe_presence};

impl SnapshotManager {
    /// true, если <snapshots>/<id> существует. CannotRead, если определить нельзя.
    pub fn snapshot_exists(&self, id: u64) -> Result<bool> {
        let _g = self.shared()?;
        probe_presence(&self.layout.snapshot_dir(id))
    }

    /// Identifiers present, ascending. Non-canonical names ("007", "tmp") are ignored.
    pub fn list_snapshots(&self) -> Result<Vec<u64>> {
        let _g = self.shared()?;
        self.list_locked()
    }

    pub fn latest_snapshot(&self) -> Result<Option<u64>> {
        let _g = self.shared()?;
        Ok(self.list_locked()?.last().copied())
    }

    fn list_locked(&self) -> Result<Vec<u64>> {
        let dir = self.layout.snapshots_dir();
        let rd = fs::read_dir(dir).map_err(|e| SnapshotError::cannot_read(dir, e))?;
        let mut ids = Vec::new();
        for entry in rd {
            let entry = entry.map_err(|e| SnapshotError::cannot_read(dir, e))?;
            if let Some(id) = entry.file_name().to_str().and_then(parse_snapshot_name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}
