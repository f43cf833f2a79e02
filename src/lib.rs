// Базовые модули
pub mod consts;
pub mod error;
pub mod paths;
pub mod lock;
pub mod metrics;
pub mod config;

// CoW backend: трейт + btrfs / dircopy
pub mod backend;   // src/backend/{mod,btrfs}.rs, src/backend/dircopy/

// Контейнер артефакта диффа (CSDIFF01)
pub mod diff;      // src/diff/mod.rs

// Хранилище снапшотов
pub mod manager;   // src/manager/{mod,create,restore,diff,import,query,init}.rs

// Отдача артефактов пирам (JSON-RPC + загрузчик)
pub mod transfer;  // src/transfer/{mod,rpc,client}.rs

// Удобные реэкспорты
pub use backend::{BackendKind, BtrfsCli, CowBackend, DirCopyBackend};
pub use config::SnapConfig;
pub use error::{BackendError, Result, SnapshotError};
pub use manager::{init_volumes, SnapshotManager, StoreOptions};
pub use metrics::StoreMetrics;
pub use transfer::{BlockRef, SnapshotInfo, TransferService};
