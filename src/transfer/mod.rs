//! transfer — отдача артефактов снапшотов пирам кусками ограниченного размера.
//!
//! Что здесь:
//! - snapshot_info / read_fragment / chunk_count: чистые операции над файлом артефакта;
//! - TransferService: SnapshotManager + LRU-кэш подготовленных артефактов по (since, block);
//!   вытесненный артефакт удаляется с диска сразу, остальные на Drop;
//! - rpc.rs: JSON-RPC поверх tiny_http (snap_getSnapshotInfo / snap_downloadSnapshotFragment);
//! - client.rs: загрузчик артефакта по фрагментам (reqwest blocking).
//!
//! Кламп фрагмента:
//!   from >= data_size        -> пусто
//!   from + size > data_size  -> обрезать до конца
//!   size > max_chunk         -> обрезать до max_chunk

use log::{debug, info, warn};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::consts::DEFAULT_MAX_CACHED_ARTIFACTS;
use crate::error::SnapshotError;
use crate::manager::SnapshotManager;

pub mod client;
pub mod rpc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub data_size: u64,
    pub max_allowed_chunk_size: u64,
    /// hex
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub from: u64,
    pub size: u64,
    pub data: Vec<u8>,
}

/// Ссылка на блок в запросе: число или "latest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BlockRefRaw")]
pub enum BlockRef {
    Latest,
    Number(u64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BlockRefRaw {
    Num(u64),
    Str(String),
}

impl TryFrom<BlockRefRaw> for BlockRef {
    type Error = String;

    fn try_from(raw: BlockRefRaw) -> Result<Self, Self::Error> {
        match raw {
            BlockRefRaw::Num(n) => Ok(BlockRef::Number(n)),
            BlockRefRaw::Str(s) => BlockRef::parse(&s).ok_or_else(|| format!("bad block number '{}'", s)),
        }
    }
}

impl BlockRef {
    /// "latest", десятичное число или 0x-hex.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            return Some(BlockRef::Latest);
        }
        let n = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok()?,
            None => s.parse::<u64>().ok()?,
        };
        Some(BlockRef::Number(n))
    }
}

impl Serialize for BlockRef {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockRef::Latest => s.serialize_str("latest"),
            BlockRef::Number(n) => s.serialize_u64(*n),
        }
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockRef::Latest => f.write_str("latest"),
            BlockRef::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Store(#[from] SnapshotError),

    #[error("no snapshots available")]
    NoSnapshots,

    #[error("artifact {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

// ---------------- pure artifact operations ----------------

pub fn chunk_count(data_size: u64, max_chunk: u64) -> u64 {
    if max_chunk == 0 {
        return 0;
    }
    data_size.div_ceil(max_chunk)
}

/// (from, size) после клампа.
pub fn clamp_fragment(data_size: u64, from: u64, size: u64, max_chunk: u64) -> (u64, u64) {
    if from >= data_size {
        return (from, 0);
    }
    let size = size.min(data_size - from).min(max_chunk);
    (from, size)
}

pub fn snapshot_info(path: &Path, max_chunk: u64) -> io::Result<SnapshotInfo> {
    let mut f = File::open(path)?;
    let mut h = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
        total += n as u64;
    }
    Ok(SnapshotInfo {
        data_size: total,
        max_allowed_chunk_size: max_chunk,
        sha256: hex_lower(&h.finalize()),
    })
}

pub fn read_fragment(path: &Path, from: u64, size: u64, max_chunk: u64) -> io::Result<Fragment> {
    let mut f = File::open(path)?;
    let data_size = f.metadata()?.len();
    let (from, size) = clamp_fragment(data_size, from, size, max_chunk);
    let mut data = vec![0u8; size as usize];
    if size > 0 {
        f.seek(SeekFrom::Start(from))?;
        f.read_exact(&mut data)?;
    }
    Ok(Fragment { from, size, data })
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

// ---------------- service ----------------

#[derive(Debug, Clone)]
struct Prepared {
    path: PathBuf,
    info: SnapshotInfo,
    last_used: u64,
}

type CacheKey = (Option<u64>, u64);

/// Не больше `limit` артефактов; при переполнении вытесняется давно не использованный.
struct ArtifactCache {
    limit: usize,
    tick: u64,
    entries: HashMap<CacheKey, Prepared>,
}

impl ArtifactCache {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            tick: 0,
            entries: HashMap::new(),
        }
    }

    fn touch(&mut self, key: &CacheKey) -> Option<&Prepared> {
        self.tick += 1;
        let tick = self.tick;
        let p = self.entries.get_mut(key)?;
        p.last_used = tick;
        Some(&*p)
    }

    fn forget(&mut self, key: &CacheKey) -> Option<PathBuf> {
        self.entries.remove(key).map(|p| p.path)
    }

    /// Вставить запись; возвращает пути вытесненных артефактов.
    fn insert(&mut self, key: CacheKey, path: PathBuf, info: SnapshotInfo) -> Vec<PathBuf> {
        let mut evicted = Vec::new();
        if let Some(old) = self.forget(&key) {
            evicted.push(old);
        }
        while self.entries.len() >= self.limit {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, p)| p.last_used)
                .map(|(k, _)| *k);
            match oldest.and_then(|k| self.forget(&k)) {
                Some(path) => evicted.push(path),
                None => break,
            }
        }
        self.tick += 1;
        self.entries.insert(
            key,
            Prepared {
                path,
                info,
                last_used: self.tick,
            },
        );
        evicted
    }

    fn drain_paths(&mut self) -> Vec<PathBuf> {
        self.entries.drain().map(|(_, p)| p.path).collect()
    }
}

fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("evicted artifact {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("cannot remove artifact {}: {}", path.display(), e),
    }
}

/// Артефакт, готовый к отдаче.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedArtifact {
    pub block: u64,
    pub since: Option<u64>,
    pub path: PathBuf,
    pub info: SnapshotInfo,
}

/// Отдача артефактов одного хранилища.
/// Артефакты создаются лениво и принадлежат сервису: вытесненные из кэша
/// удаляются сразу, оставшиеся на Drop.
pub struct TransferService {
    manager: SnapshotManager,
    max_chunk: u64,
    cache: Mutex<ArtifactCache>,
}

impl TransferService {
    pub fn new(manager: SnapshotManager, max_chunk: u64) -> Self {
        Self {
            manager,
            max_chunk: max_chunk.max(1),
            cache: Mutex::new(ArtifactCache::new(DEFAULT_MAX_CACHED_ARTIFACTS)),
        }
    }

    /// Сколько подготовленных артефактов держать на диске (ноль трактуется как один).
    pub fn with_cache_limit(mut self, limit: usize) -> Self {
        let cache = self.cache.get_mut().unwrap_or_else(|p| p.into_inner());
        cache.limit = limit.max(1);
        self
    }

    pub fn cache_limit(&self) -> usize {
        self.lock_cache().limit
    }

    /// Число артефактов в кэше сейчас.
    pub fn cached_artifacts(&self) -> usize {
        self.lock_cache().entries.len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, ArtifactCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn manager(&self) -> &SnapshotManager {
        &self.manager
    }

    pub fn max_chunk(&self) -> u64 {
        self.max_chunk
    }

    fn resolve(&self, block: BlockRef) -> TransferResult<u64> {
        match block {
            BlockRef::Number(n) => Ok(n),
            BlockRef::Latest => self
                .manager
                .latest_snapshot()?
                .ok_or(TransferError::NoSnapshots),
        }
    }

    /// Подготовить (или взять из кэша) артефакт для `block` (since = база инкремента).
    pub fn prepare(&self, block: BlockRef, since: Option<u64>) -> TransferResult<PreparedArtifact> {
        let block = self.resolve(block)?;
        let key = (since, block);
        let mut cache = self.lock_cache();

        if let Some(p) = cache.touch(&key) {
            if p.path.is_file() {
                return Ok(PreparedArtifact {
                    block,
                    since,
                    path: p.path.clone(),
                    info: p.info.clone(),
                });
            }
            warn!("cached artifact {} disappeared, rebuilding", p.path.display());
            cache.forget(&key);
        }

        let path = match since {
            Some(from) => self.manager.make_diff(from, block)?,
            None => self.manager.export_snapshot(block)?,
        };
        let info = match snapshot_info(&path, self.max_chunk) {
            Ok(info) => info,
            Err(e) => {
                remove_artifact(&path);
                return Err(TransferError::Artifact { path, source: e });
            }
        };
        info!(
            "prepared artifact for block {} (since {:?}): {} bytes, {} chunk(s)",
            block,
            since,
            info.data_size,
            chunk_count(info.data_size, self.max_chunk)
        );
        for old in cache.insert(key, path.clone(), info.clone()) {
            remove_artifact(&old);
        }
        Ok(PreparedArtifact {
            block,
            since,
            path,
            info,
        })
    }

    pub fn fragment(
        &self,
        block: BlockRef,
        since: Option<u64>,
        from: u64,
        size: u64,
    ) -> TransferResult<Fragment> {
        let mut prepared = self.prepare(block, since)?;
        let mut res = read_fragment(&prepared.path, from, size, self.max_chunk);
        // артефакт могли вытеснить между prepare и чтением
        if matches!(&res, Err(e) if e.kind() == io::ErrorKind::NotFound) {
            prepared = self.prepare(block, since)?;
            res = read_fragment(&prepared.path, from, size, self.max_chunk);
        }
        let frag = res.map_err(|e| TransferError::Artifact {
            path: prepared.path.clone(),
            source: e,
        })?;
        debug!(
            "fragment block={} from={} size={} (asked {})",
            prepared.block, frag.from, frag.size, size
        );
        self.manager.metrics().record_fragment_served(frag.data.len());
        Ok(frag)
    }
}

impl Drop for TransferService {
    fn drop(&mut self) {
        let cache = self.cache.get_mut().unwrap_or_else(|p| p.into_inner());
        for path in cache.drain_paths() {
            let _ = fs::remove_file(&path);
        }
    }
}
