use anyhow::{Context, Result};

use crate::cli::StoreArgs;
use crate::util::{open_store, print_json_array};

pub fn exec_create(store: StoreArgs, id: u64) -> Result<()> {
    let mgr = open_store(&store)?;
    mgr.do_snapshot(id)
        .with_context(|| format!("snapshot {}", id))?;
    println!("snapshot: id={} dir={}", id, mgr.snapshot_dir(id).display());
    Ok(())
}

pub fn exec_restore(store: StoreArgs, id: u64) -> Result<()> {
    let mgr = open_store(&store)?;
    mgr.restore_snapshot(id)
        .with_context(|| format!("restore snapshot {}", id))?;
    println!("restored: id={} volumes={}", id, mgr.volumes().join(","));
    Ok(())
}

/// Список id снапшотов, опционально JSON.
pub fn exec_list(store: StoreArgs, json: bool) -> Result<()> {
    let mgr = open_store(&store)?;
    let ids = mgr.list_snapshots().context("list snapshots")?;
    if json {
        print_json_array(&ids);
        return Ok(());
    }
    if ids.is_empty() {
        println!("(no snapshots)");
        return Ok(());
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}
