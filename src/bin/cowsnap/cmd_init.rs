use anyhow::{Context, Result};

use cowsnap::init_volumes;

use crate::cli::StoreArgs;

/// Создать недостающие живые тома выбранным backend'ом.
pub fn exec(store: StoreArgs) -> Result<()> {
    let cfg = store.config();
    let backend = cfg.backend.build(&cfg.btrfs_bin);
    let created = init_volumes(&*backend, &cfg.root, cfg.volumes.as_slice())
        .with_context(|| format!("init volumes at {}", cfg.root.display()))?;
    if created.is_empty() {
        println!("all volumes present");
    } else {
        println!("created: {}", created.join(","));
    }
    Ok(())
}
