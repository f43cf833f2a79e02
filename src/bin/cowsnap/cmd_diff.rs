use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli::StoreArgs;
use crate::util::{move_artifact, open_store};

pub fn exec_diff(store: StoreArgs, from: u64, to: u64, out: Option<PathBuf>) -> Result<()> {
    let mgr = open_store(&store)?;
    let art = mgr
        .make_diff(from, to)
        .with_context(|| format!("diff {} -> {}", from, to))?;
    let art = move_artifact(&art, out)?;
    println!("diff: {} -> {} artifact={}", from, to, art.display());
    Ok(())
}

pub fn exec_export(store: StoreArgs, id: u64, out: Option<PathBuf>) -> Result<()> {
    let mgr = open_store(&store)?;
    let art = mgr
        .export_snapshot(id)
        .with_context(|| format!("export snapshot {}", id))?;
    let art = move_artifact(&art, out)?;
    println!("export: id={} artifact={}", id, art.display());
    Ok(())
}

pub fn exec_import(store: StoreArgs, id: u64, file: PathBuf) -> Result<()> {
    let mgr = open_store(&store)?;
    mgr.import_diff(id, &file)
        .with_context(|| format!("import snapshot {} from {}", id, file.display()))?;
    println!("imported: id={} dir={}", id, mgr.snapshot_dir(id).display());
    Ok(())
}
