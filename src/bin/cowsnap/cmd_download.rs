use anyhow::{anyhow, Result};
use std::path::PathBuf;

use cowsnap::transfer::client::{download, DownloadRequest};
use cowsnap::BlockRef;

pub fn exec(url: String, out: PathBuf, block: String, since: Option<u64>, binary: bool) -> Result<()> {
    let block = BlockRef::parse(&block).ok_or_else(|| anyhow!("bad --block '{}'", block))?;
    let req = DownloadRequest {
        block,
        since,
        binary,
    };
    let outcome = download(&url, &out, &req, |done, total| {
        eprint!("\rfragments: {}/{}", done, total);
        true
    })?;
    eprintln!();
    println!(
        "downloaded: block={} bytes={} sha256={} file={}",
        outcome.block,
        outcome.info.data_size,
        outcome.info.sha256,
        out.display()
    );
    Ok(())
}
