//! Error taxonomy of the snapshot store.
//!
//! Every store operation either succeeds or returns exactly one `SnapshotError`.
//! Each variant carries the filesystem path it is about, so callers (and tests)
//! can tell *which* directory was missing or unreadable.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Closed set of store failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Root or a declared volume does not resolve to a directory, or a name is unusable.
    #[error("invalid path {}", path.display())]
    InvalidPath { path: PathBuf },

    /// mkdir / file creation / rename / lock refused.
    #[error("cannot create {}: {source}", path.display())]
    CannotCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A required directory or file cannot be statted, listed or opened.
    #[error("cannot read {}: {source}", path.display())]
    CannotRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot {id} already present at {}", path.display())]
    SnapshotPresent { id: u64, path: PathBuf },

    #[error("snapshot {id} absent at {}", path.display())]
    SnapshotAbsent { id: u64, path: PathBuf },

    /// The backend primitive itself failed (or the artifact it was fed is malformed).
    #[error("cannot perform btrfs operation on {}: {source}", path.display())]
    CannotPerformBtrfsOperation {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
}

impl SnapshotError {
    /// Offending path, whatever the kind.
    pub fn path(&self) -> &Path {
        match self {
            SnapshotError::InvalidPath { path }
            | SnapshotError::CannotCreate { path, .. }
            | SnapshotError::CannotRead { path, .. }
            | SnapshotError::SnapshotPresent { path, .. }
            | SnapshotError::SnapshotAbsent { path, .. }
            | SnapshotError::CannotPerformBtrfsOperation { path, .. } => path,
        }
    }

    /// Short stable name of the kind (logs, RPC error payloads).
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotError::InvalidPath { .. } => "InvalidPath",
            SnapshotError::CannotCreate { .. } => "CannotCreate",
            SnapshotError::CannotRead { .. } => "CannotRead",
            SnapshotError::SnapshotPresent { .. } => "SnapshotPresent",
            SnapshotError::SnapshotAbsent { .. } => "SnapshotAbsent",
            SnapshotError::CannotPerformBtrfsOperation { .. } => "CannotPerformBtrfsOperation",
        }
    }

    pub(crate) fn invalid_path(path: impl Into<PathBuf>) -> Self {
        SnapshotError::InvalidPath { path: path.into() }
    }

    pub(crate) fn cannot_create(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnapshotError::CannotCreate {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn cannot_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnapshotError::CannotRead {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn backend(path: impl Into<PathBuf>, source: BackendError) -> Self {
        SnapshotError::CannotPerformBtrfsOperation {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by a `CowBackend` implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Path is not on (or not) a subvolume of a supported copy-on-write filesystem.
    #[error("{}: not a copy-on-write subvolume", path.display())]
    Unsupported { path: PathBuf },

    /// External tool exited unsuccessfully.
    #[error("`{command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Send/receive stream (or artifact framing) is malformed.
    #[error("malformed stream: {0}")]
    Stream(String),
}

impl BackendError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BackendError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_reported_for_every_kind() {
        let p = PathBuf::from("/r/snapshots/3");
        let errs = vec![
            SnapshotError::invalid_path(&p),
            SnapshotError::cannot_create(&p, io::Error::from(io::ErrorKind::PermissionDenied)),
            SnapshotError::cannot_read(&p, io::Error::from(io::ErrorKind::PermissionDenied)),
            SnapshotError::SnapshotPresent { id: 3, path: p.clone() },
            SnapshotError::SnapshotAbsent { id: 3, path: p.clone() },
            SnapshotError::backend(&p, BackendError::Stream("x".into())),
        ];
        for e in &errs {
            assert_eq!(e.path(), p.as_path(), "{}", e.kind());
        }
    }
}
