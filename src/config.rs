//! Centralized configuration and builder for cowsnap.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - SnapConfig::from_env() reads the COWSNAP_* variables on top of the defaults.
//! - Builder-style setters (with_*) override individual fields; CLI flags go through them.
//!
//! Defaults:
//! - root = ".", volumes = [] (a store needs at least the root to be set explicitly
//!   in practice; an empty volume list is legal but snapshots nothing)
//! - backend = btrfs, btrfs_bin = "btrfs"
//! - diffs_dir = None (<root>/diffs)
//! - max_chunk_size = 1 MiB, max_cached_artifacts = 8, rpc_addr = 0.0.0.0:7070

use std::fmt;
use std::path::PathBuf;

use crate::backend::BackendKind;
use crate::consts::{DEFAULT_MAX_CACHED_ARTIFACTS, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_RPC_ADDR};

/// Top-level configuration of one snapshot store (and its RPC front).
#[derive(Clone, Debug)]
pub struct SnapConfig {
    /// Managed root directory.
    /// Env: COWSNAP_ROOT
    pub root: PathBuf,

    /// Volume names in declaration order.
    /// Env: COWSNAP_VOLUMES = "blocks,state" (comma separated, blanks dropped)
    pub volumes: Vec<String>,

    /// Env: COWSNAP_BACKEND = btrfs|dircopy (default btrfs)
    pub backend: BackendKind,

    /// btrfs executable used by the btrfs backend.
    /// Env: COWSNAP_BTRFS_BIN (default "btrfs")
    pub btrfs_bin: String,

    /// Directory for diff artifacts; relative paths are resolved against root.
    /// Env: COWSNAP_DIFFS_DIR (default None => <root>/diffs)
    pub diffs_dir: Option<PathBuf>,

    /// Maximum fragment size served to peers.
    /// Env: COWSNAP_MAX_CHUNK (default 1 MiB)
    pub max_chunk_size: u64,

    /// Prepared artifacts kept on disk by the RPC front; older ones are deleted.
    /// Env: COWSNAP_MAX_CACHED (default 8)
    pub max_cached_artifacts: usize,

    /// Listen address of the RPC server.
    /// Env: COWSNAP_RPC_ADDR (default 0.0.0.0:7070)
    pub rpc_addr: String,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            volumes: Vec::new(),
            backend: BackendKind::Btrfs,
            btrfs_bin: "btrfs".to_string(),
            diffs_dir: None,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_cached_artifacts: DEFAULT_MAX_CACHED_ARTIFACTS,
            rpc_addr: DEFAULT_RPC_ADDR.to_string(),
        }
    }
}

/// "a, b,,c" -> ["a", "b", "c"]
pub fn parse_volume_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl SnapConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("COWSNAP_ROOT") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.root = PathBuf::from(s);
            }
        }

        if let Ok(v) = std::env::var("COWSNAP_VOLUMES") {
            cfg.volumes = parse_volume_list(&v);
        }

        if let Ok(v) = std::env::var("COWSNAP_BACKEND") {
            if let Some(k) = BackendKind::parse(&v) {
                cfg.backend = k;
            }
        }

        if let Ok(v) = std::env::var("COWSNAP_BTRFS_BIN") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.btrfs_bin = s.to_string();
            }
        }

        if let Ok(v) = std::env::var("COWSNAP_DIFFS_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.diffs_dir = Some(PathBuf::from(s));
            }
        }

        if let Ok(v) = std::env::var("COWSNAP_MAX_CHUNK") {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    cfg.max_chunk_size = n;
                }
            }
        }

        if let Ok(v) = std::env::var("COWSNAP_MAX_CACHED") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n > 0 {
                    cfg.max_cached_artifacts = n;
                }
            }
        }

        if let Ok(v) = std::env::var("COWSNAP_RPC_ADDR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.rpc_addr = s.to_string();
            }
        }

        cfg
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_volumes<I, S>(mut self, volumes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volumes = volumes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    pub fn with_btrfs_bin<S: Into<String>>(mut self, bin: S) -> Self {
        self.btrfs_bin = bin.into();
        self
    }

    /// Override the default diffs directory.
    pub fn with_diffs_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.diffs_dir = dir.map(Into::into);
        self
    }

    /// Zero is ignored (a fragment must carry at least one byte).
    pub fn with_max_chunk_size(mut self, n: u64) -> Self {
        if n > 0 {
            self.max_chunk_size = n;
        }
        self
    }

    /// Zero is ignored.
    pub fn with_max_cached_artifacts(mut self, n: usize) -> Self {
        if n > 0 {
            self.max_cached_artifacts = n;
        }
        self
    }

    pub fn with_rpc_addr<S: Into<String>>(mut self, addr: S) -> Self {
        self.rpc_addr = addr.into();
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> Self {
        self
    }
}

impl fmt::Display for SnapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SnapConfig {{ \
             root: {}, \
             volumes: [{}], \
             backend: {}, \
             btrfs_bin: {}, \
             diffs_dir: {}, \
             max_chunk_size: {}, \
             max_cached_artifacts: {}, \
             rpc_addr: {} \
             }}",
            self.root.display(),
            self.volumes.join(","),
            self.backend,
            self.btrfs_bin,
            self.diffs_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "default(<root>/diffs)".to_string()),
            self.max_chunk_size,
            self.max_cached_artifacts,
            self.rpc_addr,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_list_parsing() {
        assert_eq!(parse_volume_list("vol1, vol2,,vol3 "), ["vol1", "vol2", "vol3"]);
        assert!(parse_volume_list("").is_empty());
    }
}
