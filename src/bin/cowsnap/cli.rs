use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use cowsnap::{BackendKind, SnapConfig};

/// CLI хранилища снапшотов cowsnap
#[derive(Parser, Debug)]
#[command(name = "cowsnap", version, about = "Multi-volume CoW snapshot store")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Общие параметры хранилища. Не заданные флаги берутся из COWSNAP_* env.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Managed root (env COWSNAP_ROOT)
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Volume names, comma separated (env COWSNAP_VOLUMES)
    #[arg(long, value_delimiter = ',')]
    pub volumes: Vec<String>,
    /// btrfs | dircopy (env COWSNAP_BACKEND)
    #[arg(long)]
    pub backend: Option<BackendKind>,
    /// btrfs executable (env COWSNAP_BTRFS_BIN)
    #[arg(long)]
    pub btrfs_bin: Option<String>,
    /// Diff artifacts directory (env COWSNAP_DIFFS_DIR)
    #[arg(long)]
    pub diffs_dir: Option<PathBuf>,
}

impl StoreArgs {
    /// Env + переопределения из флагов.
    pub fn config(&self) -> SnapConfig {
        let mut cfg = SnapConfig::from_env();
        if let Some(r) = &self.root {
            cfg = cfg.with_root(r.clone());
        }
        if !self.volumes.is_empty() {
            cfg = cfg.with_volumes(self.volumes.iter().map(|s| s.trim().to_string()));
        }
        if let Some(b) = self.backend {
            cfg = cfg.with_backend(b);
        }
        if let Some(bin) = &self.btrfs_bin {
            cfg = cfg.with_btrfs_bin(bin.clone());
        }
        if self.diffs_dir.is_some() {
            cfg = cfg.with_diffs_dir(self.diffs_dir.clone());
        }
        cfg.build()
    }
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create missing live subvolumes <root>/<volume>
    Init {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Snapshot all volumes under <root>/snapshots/<id>
    Snapshot {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        id: u64,
    },
    /// Replace live volumes with writable clones of snapshot <id>
    Restore {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        id: u64,
    },
    /// List snapshot ids (ascending). --json prints a JSON array.
    List {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Build an incremental artifact <from> -> <to>
    Diff {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
        /// Move the artifact here (default: keep it in the diffs directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Build a full artifact of snapshot <id>
    Export {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import snapshot <id> from an artifact
    Import {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        file: PathBuf,
    },
    /// Download an artifact from a peer's RPC endpoint
    Download {
        /// e.g. http://10.0.0.5:7070/
        #[arg(long)]
        url: String,
        #[arg(long)]
        out: PathBuf,
        /// Block number or "latest"
        #[arg(long, default_value = "latest")]
        block: String,
        /// Base snapshot for an incremental artifact
        #[arg(long)]
        since: Option<u64>,
        /// Request raw fragments instead of base64
        #[arg(long, default_value_t = false)]
        binary: bool,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }
}
