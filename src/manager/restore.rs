//! restore_snapshot: replace live volumes with writable clones of a snapshot.
//!
//! Для каждого тома по порядку:
//!   1) удалить застрявший <root>/.restore-<vol> (остаток упавшего запуска);
//!   2) snapshot(<snapshots>/<id>/<vol> -> <root>/.restore-<vol>, rw);
//!   3) удалить живой <root>/<vol> (если есть);
//!   4) rename .restore-<vol> -> <vol>.
//! Отсутствующий том снапшота падает на шаге 2, живой том не тронут.
//! Между томами отката нет: предыдущие тома остаются восстановленными.

use log::{debug, info, warn};
use std::fs;

use super::SnapshotManager;
use crate::error::{Result, SnapshotError};
use crate::paths::probe_presence;

impl SnapshotManager {
    pub fn restore_snapshot(&self, id: u64) -> Result<()> {
        let _g = self.structural()?;
        let res = self.restore_locked(id);
        match &res {
            Ok(()) => {
                self.metrics.record_restore_done();
                info!("snapshot {} restored into live volumes", id);
            }
            Err(e) => {
                self.metrics.record_restore_failed();
                warn!("restore of snapshot {} failed: {}", id, e);
            }
        }
        res
    }

    fn restore_locked(&self, id: u64) -> Result<()> {
        self.require_present(id)?;

        for vol in &self.volumes {
            let src = self.layout.snapshot_volume(id, vol);
            let live = self.layout.live_volume(vol);
            let staging = self.layout.staging_volume(vol);

            if probe_presence(&staging)? {
                warn!("removing stale restore staging {}", staging.display());
                self.backend
                    .delete_subvolume(&staging)
                    .map_err(|e| SnapshotError::backend(&staging, e))?;
            }

            debug!("restore {}: {} -> {}", id, src.display(), staging.display());
            self.backend
                .snapshot(&src, &staging, false)
                .map_err(|e| SnapshotError::backend(&src, e))?;

            if probe_presence(&live)? {
                self.backend
                    .delete_subvolume(&live)
                    .map_err(|e| SnapshotError::backend(&live, e))?;
            }
            fs::rename(&staging, &live).map_err(|e| SnapshotError::cannot_create(&live, e))?;
        }
        Ok(())
    }
}
