//! Snapshot store: multi-volume snapshots over a CoW backend.
//!
//! Submodules:
//! - create.rs:  do_snapshot
//! - restore.rs: restore_snapshot (per-volume staging clone + rename)
//! - diff.rs:    make_diff / export_snapshot (artifact writer)
//! - import.rs:  import_diff (artifact reader)
//! - query.rs:   snapshot_exists / list_snapshots / latest_snapshot
//! - init.rs:    init_volumes (lay out live subvolumes before the store exists)
//!
//! Раскладка и проверки путей — в crate::paths, формат артефакта — в crate::diff.
//!
//! Concurrency: structural operations (do_snapshot / restore_snapshot / import_diff)
//! take the in-process RwLock for writing plus the exclusive file lock; everything
//! else takes both in shared mode.

use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::CowBackend;
use crate::config::SnapConfig;
use crate::error::{Result, SnapshotError};
use crate::lock::{LockGuard, LockMode, RootLock};
use crate::metrics::StoreMetrics;
use crate::paths::{probe_presence, validate_layout, Layout};

mod create;
mod diff;
mod import;
mod init;
mod query;
mod restore;

pub use init::init_volumes;

/// Construction options beyond root/volumes/backend.
#[derive(Clone, Debug, Default)]
pub struct StoreOptions {
    /// None => <root>/diffs; relative paths are resolved against root.
    pub diffs_dir: Option<PathBuf>,
    /// Shared counters; None => a fresh set owned by this store.
    pub metrics: Option<Arc<StoreMetrics>>,
}

pub struct SnapshotManager {
    layout: Layout,
    volumes: Vec<String>,
    backend: Box<dyn CowBackend>,
    lock: RootLock,
    guard: RwLock<()>,
    metrics: Arc<StoreMetrics>,
}

/// Held for the duration of one operation. File lock is released first.
pub(crate) struct OpGuard<'a> {
    _file: LockGuard,
    _mem: MemGuard<'a>,
}

#[allow(dead_code)]
enum MemGuard<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

impl SnapshotManager {
    /// Store over `root` with the given volumes and default options.
    pub fn new<S, B>(root: &Path, volumes: &[S], backend: B) -> Result<Self>
    where
        S: AsRef<str>,
        B: CowBackend + 'static,
    {
        Self::with_backend(root, volumes, Box::new(backend), StoreOptions::default())
    }

    /// Build backend and store from a configuration.
    pub fn open(cfg: &SnapConfig) -> Result<Self> {
        let backend = cfg.backend.build(&cfg.btrfs_bin);
        let opts = StoreOptions {
            diffs_dir: cfg.diffs_dir.clone(),
            metrics: None,
        };
        Self::with_backend(&cfg.root, cfg.volumes.as_slice(), backend, opts)
    }

    /// Full constructor.
    ///
    /// Порядок:
    /// 1) root и тома (InvalidPath, первый неверный побеждает);
    /// 2) <root>/snapshots (CannotCreate);
    /// 3) каталог диффов (CannotCreate), его содержимое не трогаем;
    /// 4) lock-файл (CannotCreate);
    /// 5) backend.probe каждого тома (CannotPerformBtrfsOperation).
    pub fn with_backend<S: AsRef<str>>(
        root: &Path,
        volumes: &[S],
        backend: Box<dyn CowBackend>,
        opts: StoreOptions,
    ) -> Result<Self> {
        let volumes: Vec<String> = volumes.iter().map(|v| v.as_ref().to_string()).collect();
        validate_layout(root, &volumes)?;

        let layout = Layout::new(root, opts.diffs_dir.as_deref());
        ensure_dir(layout.snapshots_dir())?;
        fs::create_dir_all(layout.diffs_dir())
            .map_err(|e| SnapshotError::cannot_create(layout.diffs_dir(), e))?;
        let lock = RootLock::create(&layout.lock_path())?;

        for vol in &volumes {
            let p = layout.live_volume(vol);
            backend
                .probe(&p)
                .map_err(|e| SnapshotError::backend(&p, e))?;
        }

        info!(
            "snapshot store opened: root={}, volumes=[{}], backend={}",
            root.display(),
            volumes.join(","),
            backend.name()
        );
        Ok(Self {
            layout,
            volumes,
            backend,
            lock,
            guard: RwLock::new(()),
            metrics: opts.metrics.unwrap_or_default(),
        })
    }

    // ---------------- accessors ----------------

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn volumes(&self) -> &[String] {
        &self.volumes
    }

    pub fn snapshots_dir(&self) -> &Path {
        self.layout.snapshots_dir()
    }

    pub fn snapshot_dir(&self, id: u64) -> PathBuf {
        self.layout.snapshot_dir(id)
    }

    pub fn diffs_dir(&self) -> &Path {
        self.layout.diffs_dir()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Counters of this store (observability only).
    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    // ---------------- internals ----------------

    pub(crate) fn structural(&self) -> Result<OpGuard<'_>> {
        // poisoned lock only means another op panicked; the guarded data is ()
        let mem = self.guard.write().unwrap_or_else(|p| p.into_inner());
        let file = self.lock.acquire(LockMode::Exclusive)?;
        Ok(OpGuard {
            _file: file,
            _mem: MemGuard::Write(mem),
        })
    }

    pub(crate) fn shared(&self) -> Result<OpGuard<'_>> {
        let mem = self.guard.read().unwrap_or_else(|p| p.into_inner());
        let file = self.lock.acquire(LockMode::Shared)?;
        Ok(OpGuard {
            _file: file,
            _mem: MemGuard::Read(mem),
        })
    }

    /// Снапшот должен существовать: иначе SnapshotAbsent / CannotRead.
    pub(crate) fn require_present(&self, id: u64) -> Result<PathBuf> {
        let dir = self.layout.snapshot_dir(id);
        if probe_presence(&dir)? {
            Ok(dir)
        } else {
            Err(SnapshotError::SnapshotAbsent { id, path: dir })
        }
    }

    /// Снапшота быть не должно: иначе SnapshotPresent / CannotRead.
    pub(crate) fn require_absent(&self, id: u64) -> Result<PathBuf> {
        let dir = self.layout.snapshot_dir(id);
        if probe_presence(&dir)? {
            Err(SnapshotError::SnapshotPresent { id, path: dir })
        } else {
            Ok(dir)
        }
    }
}

fn ensure_dir(p: &Path) -> Result<()> {
    match fs::create_dir(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && p.is_dir() => Ok(()),
        Err(e) => Err(SnapshotError::cannot_create(p, e)),
    }
}
