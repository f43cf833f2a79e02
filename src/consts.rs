//! Общие константы раскладки на диске и форматов (артефакт диффа, поток dircopy).

// -------- Layout --------
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const DIFFS_DIR: &str = "diffs";
pub const LOCK_FILE: &str = ".cowsnap.lock";
// Временный субволюм при restore: <root>/.restore-<volume>
pub const RESTORE_STAGING_PREFIX: &str = ".restore-";

// -------- Diff artifact --------
pub const DIFF_EXT: &str = "diff";
pub const DIFF_MAGIC: &[u8; 8] = b"CSDIFF01";
pub const DIFF_VERSION: u32 = 1;
pub const DIFF_FLAG_INCREMENTAL: u32 = 0x1;
pub const DIFF_HDR_SIZE: usize = 36; // [magic8][ver u32][flags u32][from u64][to u64][sections u32]
// Заголовок секции после имени: [payload_len u64][crc32 u32]
pub const DIFF_SECTION_TAIL_SIZE: usize = 12;

// -------- DirCopy stream --------
pub const COPY_MAGIC: &[u8; 8] = b"CSCOPY01";
pub const COPY_REC_END: u8 = 0;
pub const COPY_REC_MKDIR: u8 = 1;
pub const COPY_REC_WRITE: u8 = 2;
pub const COPY_REC_SYMLINK: u8 = 3;
pub const COPY_REC_REMOVE: u8 = 4;

// -------- Transfer --------
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 1024 * 1024;
// Подготовленных артефактов на диске у одного TransferService.
pub const DEFAULT_MAX_CACHED_ARTIFACTS: usize = 8;
pub const DEFAULT_RPC_ADDR: &str = "0.0.0.0:7070";
