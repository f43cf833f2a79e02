use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use cowsnap::SnapshotManager;

use crate::cli::StoreArgs;

pub fn open_store(args: &StoreArgs) -> Result<SnapshotManager> {
    let cfg = args.config();
    log::debug!("{}", cfg);
    SnapshotManager::open(&cfg)
        .with_context(|| format!("open snapshot store at {}", cfg.root.display()))
}

/// Переместить артефакт в `out` (rename, а между ФС — copy + remove).
pub fn move_artifact(src: &Path, out: Option<PathBuf>) -> Result<PathBuf> {
    let dst = match out {
        Some(d) => d,
        None => return Ok(src.to_path_buf()),
    };
    if fs::rename(src, &dst).is_err() {
        fs::copy(src, &dst)
            .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))?;
        fs::remove_file(src).with_context(|| format!("remove {}", src.display()))?;
    }
    Ok(dst)
}

pub fn print_json_array(ids: &[u64]) {
    let s = serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string());
    println!("{s}");
}
