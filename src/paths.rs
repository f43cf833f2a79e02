//! paths — проверка корня/томов и арифметика раскладки на диске.
//!
//! Раскладка:
//!   <root>/<volume>                  — живой том (writable)
//!   <root>/snapshots/<id>/<volume>   — read-only снапшот тома
//!   <root>/diffs/                    — артефакты диффов (по умолчанию)
//!
//! Проверка выполняется один раз при создании SnapshotManager и не повторяется
//! на каждом вызове.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::consts::{DIFFS_DIR, LOCK_FILE, RESTORE_STAGING_PREFIX, SNAPSHOTS_DIR};
use crate::error::{Result, SnapshotError};

/// Проверить корень и тома в порядке объявления. Первая ошибка побеждает.
pub fn validate_layout(root: &Path, volumes: &[String]) -> Result<()> {
    if !is_dir(root) {
        return Err(SnapshotError::invalid_path(root));
    }
    for (i, vol) in volumes.iter().enumerate() {
        let p = root.join(vol);
        if !is_valid_volume_name(vol) || volumes[..i].contains(vol) {
            return Err(SnapshotError::invalid_path(p));
        }
        if !is_dir(&p) {
            return Err(SnapshotError::invalid_path(p));
        }
    }
    Ok(())
}

/// Имя тома — один компонент пути, не зарезервированный раскладкой.
pub fn is_valid_volume_name(name: &str) -> bool {
    if name.is_empty() || name == SNAPSHOTS_DIR || name == DIFFS_DIR || name == LOCK_FILE {
        return false;
    }
    if name.starts_with(RESTORE_STAGING_PREFIX) {
        return false;
    }
    let mut comps = Path::new(name).components();
    matches!(
        (comps.next(), comps.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Проба присутствия: Ok(true/false), либо CannotRead, если определить нельзя
/// (например, у родителя нет права поиска).
pub fn probe_presence(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SnapshotError::cannot_read(path, e)),
    }
}

fn is_dir(p: &Path) -> bool {
    fs::metadata(p).map(|m| m.is_dir()).unwrap_or(false)
}

/// Вычисление путей для одного корня.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    snapshots: PathBuf,
    diffs: PathBuf,
}

impl Layout {
    pub fn new(root: &Path, diffs_dir: Option<&Path>) -> Self {
        let diffs = match diffs_dir {
            Some(d) if d.is_absolute() => d.to_path_buf(),
            Some(d) => root.join(d),
            None => root.join(DIFFS_DIR),
        };
        Self {
            root: root.to_path_buf(),
            snapshots: root.join(SNAPSHOTS_DIR),
            diffs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots
    }

    pub fn diffs_dir(&self) -> &Path {
        &self.diffs
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn live_volume(&self, vol: &str) -> PathBuf {
        self.root.join(vol)
    }

    pub fn staging_volume(&self, vol: &str) -> PathBuf {
        self.root.join(format!("{}{}", RESTORE_STAGING_PREFIX, vol))
    }

    /// <root>/snapshots/<id>, id в десятичной записи.
    pub fn snapshot_dir(&self, id: u64) -> PathBuf {
        self.snapshots.join(id.to_string())
    }

    pub fn snapshot_volume(&self, id: u64, vol: &str) -> PathBuf {
        self.snapshot_dir(id).join(vol)
    }
}

/// Разобрать имя каталога снапшота. Принимается только каноническая десятичная
/// запись ("01" не является id).
pub fn parse_snapshot_name(name: &str) -> Option<u64> {
    let id = name.parse::<u64>().ok()?;
    if id.to_string() == name {
        Some(id)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_names() {
        assert!(is_valid_volume_name("vol1"));
        assert!(is_valid_volume_name("blocks_and_extras"));
        assert!(!is_valid_volume_name(""));
        assert!(!is_valid_volume_name("snapshots"));
        assert!(!is_valid_volume_name("diffs"));
        assert!(!is_valid_volume_name("a/b"));
        assert!(!is_valid_volume_name(".."));
        assert!(!is_valid_volume_name("."));
        assert!(!is_valid_volume_name("/abs"));
        assert!(!is_valid_volume_name(".restore-vol1"));
    }

    #[test]
    fn snapshot_names() {
        assert_eq!(parse_snapshot_name("0"), Some(0));
        assert_eq!(parse_snapshot_name("42"), Some(42));
        assert_eq!(parse_snapshot_name("042"), None);
        assert_eq!(parse_snapshot_name("+4"), None);
        assert_eq!(parse_snapshot_name("x"), None);
    }

    #[test]
    fn layout_paths() {
        let l = Layout::new(Path::new("/data"), None);
        assert_eq!(l.snapshot_volume(7, "vol1"), PathBuf::from("/data/snapshots/7/vol1"));
        assert_eq!(l.diffs_dir(), Path::new("/data/diffs"));
        assert_eq!(l.staging_volume("vol2"), PathBuf::from("/data/.restore-vol2"));

        let l2 = Layout::new(Path::new("/data"), Some(Path::new("tmp/d")));
        assert_eq!(l2.diffs_dir(), Path::new("/data/tmp/d"));
    }
}
