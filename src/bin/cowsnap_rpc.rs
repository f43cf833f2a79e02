use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use std::path::PathBuf;

use cowsnap::transfer::rpc::RpcServer;
use cowsnap::{BackendKind, SnapConfig, SnapshotManager, TransferService};

#[derive(Parser, Debug)]
#[command(
    name = "cowsnap_rpc",
    version,
    about = "Serves snapshot artifacts to peers (JSON-RPC over HTTP)"
)]
struct Opt {
    /// Listen address (env COWSNAP_RPC_ADDR, default 0.0.0.0:7070)
    #[arg(long)]
    addr: Option<String>,
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long, value_delimiter = ',')]
    volumes: Vec<String>,
    #[arg(long)]
    backend: Option<BackendKind>,
    /// Max fragment size in bytes (env COWSNAP_MAX_CHUNK, default 1 MiB)
    #[arg(long)]
    max_chunk: Option<u64>,
    /// Prepared artifacts kept on disk (env COWSNAP_MAX_CACHED, default 8)
    #[arg(long)]
    max_cached: Option<usize>,
}

fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::parse();

    let mut cfg = SnapConfig::from_env();
    if let Some(r) = opt.root {
        cfg = cfg.with_root(r);
    }
    if !opt.volumes.is_empty() {
        cfg = cfg.with_volumes(opt.volumes);
    }
    if let Some(b) = opt.backend {
        cfg = cfg.with_backend(b);
    }
    if let Some(n) = opt.max_chunk {
        cfg = cfg.with_max_chunk_size(n);
    }
    if let Some(n) = opt.max_cached {
        cfg = cfg.with_max_cached_artifacts(n);
    }
    if let Some(a) = opt.addr {
        cfg = cfg.with_rpc_addr(a);
    }
    let cfg = cfg.build();
    info!("{}", cfg);

    let mgr = SnapshotManager::open(&cfg)
        .with_context(|| format!("open snapshot store at {}", cfg.root.display()))?;
    let svc = TransferService::new(mgr, cfg.max_chunk_size).with_cache_limit(cfg.max_cached_artifacts);

    let server = RpcServer::bind(&cfg.rpc_addr)?;
    info!("cowsnap_rpc listening on {}", cfg.rpc_addr);
    server.serve(&svc)
}
