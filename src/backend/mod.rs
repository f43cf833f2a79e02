//! Copy-on-write backend capability.
//!
//! The snapshot store never touches subvolumes itself: everything that needs
//! filesystem support (clone, delete, send, receive) goes through `CowBackend`.
//!
//! Implementations:
//! - btrfs.rs: `BtrfsCli`, drives the `btrfs` tool.
//! - dircopy/: `DirCopyBackend`, portable emulation over plain directories
//!   (recursive copies + own delta stream). Tests and non-CoW dev machines.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::BackendError;

pub mod btrfs;
pub mod dircopy;

pub use btrfs::BtrfsCli;
pub use dircopy::DirCopyBackend;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Minimal capability set the snapshot store needs from a CoW filesystem.
pub trait CowBackend: Send + Sync {
    /// Short name for logs ("btrfs", "dircopy").
    fn name(&self) -> &str;

    /// Check that `path` is something this backend can snapshot.
    fn probe(&self, path: &Path) -> BackendResult<()>;

    fn create_subvolume(&self, path: &Path) -> BackendResult<()>;

    fn delete_subvolume(&self, path: &Path) -> BackendResult<()>;

    /// Clone `src` into `dst` (`dst` must not exist).
    fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> BackendResult<()>;

    /// Write the change set `parent -> target` into `out`.
    /// `parent = None` produces a full stream.
    fn send_diff(
        &self,
        parent: Option<&Path>,
        target: &Path,
        out: &mut dyn Write,
    ) -> BackendResult<()>;

    /// Materialize `<dst_parent>/<name carried by the stream>` from `input`.
    fn receive_diff(&self, input: &mut dyn Read, dst_parent: &Path) -> BackendResult<()>;
}

/// Which backend to build from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Btrfs,
    DirCopy,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "btrfs" => Some(BackendKind::Btrfs),
            "dircopy" | "copy" => Some(BackendKind::DirCopy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Btrfs => "btrfs",
            BackendKind::DirCopy => "dircopy",
        }
    }

    pub fn build(&self, btrfs_bin: &str) -> Box<dyn CowBackend> {
        match self {
            BackendKind::Btrfs => Box::new(BtrfsCli::with_binary(btrfs_bin)),
            BackendKind::DirCopy => Box::new(DirCopyBackend::new()),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::parse(s).ok_or_else(|| format!("unknown backend '{}' (btrfs|dircopy)", s))
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<B: CowBackend + ?Sized> CowBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn probe(&self, path: &Path) -> BackendResult<()> {
        (**self).probe(path)
    }
    fn create_subvolume(&self, path: &Path) -> BackendResult<()> {
        (**self).create_subvolume(path)
    }
    fn delete_subvolume(&self, path: &Path) -> BackendResult<()> {
        (**self).delete_subvolume(path)
    }
    fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> BackendResult<()> {
        (**self).snapshot(src, dst, readonly)
    }
    fn send_diff(
        &self,
        parent: Option<&Path>,
        target: &Path,
        out: &mut dyn Write,
    ) -> BackendResult<()> {
        (**self).send_diff(parent, target, out)
    }
    fn receive_diff(&self, input: &mut dyn Read, dst_parent: &Path) -> BackendResult<()> {
        (**self).receive_diff(input, dst_parent)
    }
}

impl<B: CowBackend + ?Sized> CowBackend for std::sync::Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn probe(&self, path: &Path) -> BackendResult<()> {
        (**self).probe(path)
    }
    fn create_subvolume(&self, path: &Path) -> BackendResult<()> {
        (**self).create_subvolume(path)
    }
    fn delete_subvolume(&self, path: &Path) -> BackendResult<()> {
        (**self).delete_subvolume(path)
    }
    fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> BackendResult<()> {
        (**self).snapshot(src, dst, readonly)
    }
    fn send_diff(
        &self,
        parent: Option<&Path>,
        target: &Path,
        out: &mut dyn Write,
    ) -> BackendResult<()> {
        (**self).send_diff(parent, target, out)
    }
    fn receive_diff(&self, input: &mut dyn Read, dst_parent: &Path) -> BackendResult<()> {
        (**self).receive_diff(input, dst_parent)
    }
}
