//! import_diff: materialize snapshot `id` from an artifact.
//!
//! Артефакт целиком проверяется (заголовок, CRC всех секций, состав томов)
//! до создания <snapshots>/<id>: испорченная передача не оставляет
//! полупустой каталог снапшота, который заблокировал бы повторный импорт.

use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use super::SnapshotManager;
use crate::diff::DiffReader;
use crate::error::{BackendError, Result, SnapshotError};

impl SnapshotManager {
    /// Import snapshot `id` from `artifact` (produced by make_diff/export_snapshot).
    /// The artifact's `to` is not compared with `id`.
    pub fn import_diff(&self, id: u64, artifact: &Path) -> Result<()> {
        let _g = self.structural()?;
        let res = self.import_locked(id, artifact);
        match &res {
            Ok(()) => {
                self.metrics.record_import_done();
                info!("snapshot {} imported from {}", id, artifact.display());
            }
            Err(e) => {
                self.metrics.record_import_failed();
                warn!("import of snapshot {} from {} failed: {}", id, artifact.display(), e);
            }
        }
        res
    }

    fn import_locked(&self, id: u64, artifact: &Path) -> Result<()> {
        let dir = self.require_absent(id)?;

        match fs::metadata(artifact) {
            Ok(m) if m.is_file() => {}
            Ok(_) => return Err(SnapshotError::invalid_path(artifact)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::invalid_path(artifact))
            }
            Err(e) => return Err(SnapshotError::cannot_read(artifact, e)),
        }
        let file = File::open(artifact).map_err(|e| SnapshotError::cannot_read(artifact, e))?;

        let malformed = |e: io::Error| SnapshotError::backend(artifact, BackendError::Stream(e.to_string()));
        let mut reader = DiffReader::open(BufReader::new(file)).map_err(malformed)?;
        let sections = reader.verify().map_err(malformed)?;
        let names: Vec<&str> = sections.iter().map(|s| s.name.as_str()).collect();
        if names != self.volumes {
            return Err(SnapshotError::backend(
                artifact,
                BackendError::Stream(format!(
                    "artifact volumes [{}] do not match store volumes [{}]",
                    names.join(","),
                    self.volumes.join(",")
                )),
            ));
        }
        let hdr = *reader.header();
        debug!(
            "import {}: artifact {} (incremental={}, from={}, to={})",
            id,
            artifact.display(),
            hdr.incremental,
            hdr.from,
            hdr.to
        );

        fs::create_dir(&dir).map_err(|e| SnapshotError::cannot_create(&dir, e))?;

        while let Some((info, mut body)) = reader.next_section().map_err(malformed)? {
            debug!("import {}: receive volume {} ({} bytes)", id, info.name, info.len);
            self.backend
                .receive_diff(&mut body, &dir)
                .map_err(|e| SnapshotError::backend(dir.join(&info.name), e))?;
        }
        Ok(())
    }
}
