//! init_volumes: create live subvolumes for a fresh node.

use log::info;
use std::fs;
use std::path::Path;

use crate::backend::CowBackend;
use crate::error::{Result, SnapshotError};
use crate::paths::{is_valid_volume_name, probe_presence};

/// Create `<root>/<vol>` via the backend for every missing volume, in order.
/// Existing volumes are kept as is. Returns the names actually created.
pub fn init_volumes<S: AsRef<str>>(
    backend: &dyn CowBackend,
    root: &Path,
    volumes: &[S],
) -> Result<Vec<String>> {
    if !fs::metadata(root).map(|m| m.is_dir()).unwrap_or(false) {
        return Err(SnapshotError::invalid_path(root));
    }
    let mut created = Vec::new();
    for vol in volumes {
        let vol = vol.as_ref();
        let p = root.join(vol);
        if !is_valid_volume_name(vol) {
            return Err(SnapshotError::invalid_path(p));
        }
        if probe_presence(&p)? {
            continue;
        }
        backend
            .create_subvolume(&p)
            .map_err(|e| SnapshotError::backend(&p, e))?;
        info!("created {} subvolume {}", backend.name(), p.display());
        created.push(vol.to_string());
    }
    Ok(created)
}
