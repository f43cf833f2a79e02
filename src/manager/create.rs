//! do_snapshot: read-only clone of every volume under <root>/snapshots/<id>.

use log::{debug, info, warn};
use std::fs;

use super::SnapshotManager;
use crate::error::{Result, SnapshotError};

impl SnapshotManager {
    /// Create snapshot `id` of all volumes.
    ///
    /// - уже есть  -> SnapshotPresent (без изменений на диске)
    /// - mkdir отказал -> CannotCreate(<root>/snapshots/<id>)
    /// - клон тома -> CannotPerformBtrfsOperation; уже снятые тома остаются.
    pub fn do_snapshot(&self, id: u64) -> Result<()> {
        let _g = self.structural()?;
        let res = self.do_snapshot_locked(id);
        match &res {
            Ok(()) => {
                self.metrics.record_snapshot_created();
                info!("snapshot {} created ({} volumes)", id, self.volumes.len());
            }
            Err(e) => {
                self.metrics.record_snapshot_failed();
                warn!("snapshot {} failed: {}", id, e);
            }
        }
        res
    }

    fn do_snapshot_locked(&self, id: u64) -> Result<()> {
        let dir = self.require_absent(id)?;
        fs::create_dir(&dir).map_err(|e| SnapshotError::cannot_create(&dir, e))?;

        for vol in &self.volumes {
            let src = self.layout.live_volume(vol);
            let dst = self.layout.snapshot_volume(id, vol);
            debug!("snapshot {}: {} -> {}", id, src.display(), dst.display());
            self.backend
                .snapshot(&src, &dst, true)
                .map_err(|e| SnapshotError::backend(&dst, e))?;
        }
        Ok(())
    }
}
