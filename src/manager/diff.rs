//! make_diff / export_snapshot: pack per-volume send streams into one artifact.

use log::{debug, info, warn};
use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;

use super::SnapshotManager;
use crate::consts::DIFF_EXT;
use crate::diff::{DiffHeader, DiffWriter};
use crate::error::{Result, SnapshotError};

impl SnapshotManager {
    /// Incremental artifact `from -> to`. `from == to` и `from > to` допустимы.
    /// Returns the artifact path; the caller owns the file.
    pub fn make_diff(&self, from: u64, to: u64) -> Result<PathBuf> {
        let _g = self.shared()?;
        let res = self.make_diff_locked(from, to);
        self.log_artifact(&format!("diff {} -> {}", from, to), &res);
        res
    }

    /// Full (parent-less) artifact of snapshot `id`, for peers without a base.
    pub fn export_snapshot(&self, id: u64) -> Result<PathBuf> {
        let _g = self.shared()?;
        let res = self.export_locked(id);
        self.log_artifact(&format!("export of {}", id), &res);
        res
    }

    fn make_diff_locked(&self, from: u64, to: u64) -> Result<PathBuf> {
        self.require_present(from)?;
        self.require_present(to)?;
        self.write_artifact(
            &format!("{}_{}-", from, to),
            &DiffHeader::incremental(from, to),
            |vol| {
                (
                    Some(self.layout.snapshot_volume(from, vol)),
                    self.layout.snapshot_volume(to, vol),
                )
            },
        )
    }

    fn export_locked(&self, id: u64) -> Result<PathBuf> {
        self.require_present(id)?;
        self.write_artifact(&format!("full_{}-", id), &DiffHeader::full(id), |vol| {
            (None, self.layout.snapshot_volume(id, vol))
        })
    }

    /// Создать <diffs>/<prefix><random>.diff и заполнить секции.
    /// При любой ошибке недописанный файл удаляется (NamedTempFile на Drop).
    fn write_artifact<F>(&self, prefix: &str, header: &DiffHeader, sources: F) -> Result<PathBuf>
    where
        F: Fn(&str) -> (Option<PathBuf>, PathBuf),
    {
        let diffs = self.layout.diffs_dir();
        let suffix = format!(".{}", DIFF_EXT);
        let tmp = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(&suffix)
            .tempfile_in(diffs)
            .map_err(|e| SnapshotError::cannot_create(diffs, e))?;
        let path = tmp.path().to_path_buf();

        {
            let mut w = DiffWriter::new(BufWriter::new(tmp.as_file()), header)
                .map_err(|e| SnapshotError::cannot_create(&path, e))?;
            for vol in &self.volumes {
                let (parent, target) = sources(vol.as_str());
                debug!(
                    "send {} (parent {})",
                    target.display(),
                    parent
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
                w.begin_section(vol)
                    .map_err(|e| SnapshotError::cannot_create(&path, e))?;
                self.backend
                    .send_diff(parent.as_deref(), &target, &mut w)
                    .map_err(|e| SnapshotError::backend(&target, e))?;
                w.end_section()
                    .map_err(|e| SnapshotError::cannot_create(&path, e))?;
            }
            w.finish()
                .map_err(|e| SnapshotError::cannot_create(&path, e))?;
        }

        tmp.keep()
            .map_err(|e| SnapshotError::cannot_create(&path, e.error))?;
        Ok(path)
    }

    fn log_artifact(&self, what: &str, res: &Result<PathBuf>) {
        match res {
            Ok(p) => {
                let bytes = fs::metadata(p).map(|m| m.len()).unwrap_or(0);
                self.metrics.record_diff_made(bytes);
                info!("{} written to {} ({} bytes)", what, p.display(), bytes);
            }
            Err(e) => {
                self.metrics.record_diff_failed();
                warn!("{} failed: {}", what, e);
            }
        }
    }
}
