//! DirCopyBackend — эмуляция CoW поверх обычных каталогов.
//!
//! - snapshot = рекурсивная копия (read-only снапшот: обычные файлы без права записи);
//! - delete   = снять read-only и удалить дерево;
//! - send     = собственный поток CSCOPY01 (см. stream.rs): разница parent -> target;
//! - receive  = копия parent (или пустой каталог для полного потока) + применение записей.
//!
//! Родитель в потоке записывается относительно "деда" target
//! (<root>/snapshots), а при приёме разрешается относительно родителя dst_parent.
//! Так поток, снятый на одном корне, применяется на другом с той же раскладкой.

use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use super::{BackendResult, CowBackend};
use crate::error::BackendError;

mod stream;
mod tree;

use stream::{Record, StreamReader, StreamWriter};
use tree::Node;

#[derive(Debug, Clone, Default)]
pub struct DirCopyBackend;

impl DirCopyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CowBackend for DirCopyBackend {
    fn name(&self) -> &str {
        "dircopy"
    }

    fn probe(&self, path: &Path) -> BackendResult<()> {
        if is_real_dir(path) {
            Ok(())
        } else {
            Err(BackendError::Unsupported {
                path: path.to_path_buf(),
            })
        }
    }

    fn create_subvolume(&self, path: &Path) -> BackendResult<()> {
        fs::create_dir(path)
            .map_err(|e| BackendError::io(format!("create subvolume {}", path.display()), e))
    }

    fn delete_subvolume(&self, path: &Path) -> BackendResult<()> {
        let ctx = || format!("delete subvolume {}", path.display());
        if !is_real_dir(path) {
            return Err(BackendError::io(ctx(), not_found("no such subvolume")));
        }
        tree::set_tree_readonly(path, false).map_err(|e| BackendError::io(ctx(), e))?;
        fs::remove_dir_all(path).map_err(|e| BackendError::io(ctx(), e))
    }

    fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> BackendResult<()> {
        let ctx = || format!("snapshot {} -> {}", src.display(), dst.display());
        if !is_real_dir(src) {
            return Err(BackendError::io(ctx(), not_found("source subvolume missing")));
        }
        if fs::symlink_metadata(dst).is_ok() {
            return Err(BackendError::io(
                ctx(),
                io::Error::new(io::ErrorKind::AlreadyExists, "destination exists"),
            ));
        }
        debug!("dircopy: snapshot {} -> {} ro={}", src.display(), dst.display(), readonly);
        tree::copy_tree(src, dst, readonly).map_err(|e| BackendError::io(ctx(), e))
    }

    fn send_diff(
        &self,
        parent: Option<&Path>,
        target: &Path,
        out: &mut dyn Write,
    ) -> BackendResult<()> {
        let ctx = || format!("send {}", target.display());
        if !is_real_dir(target) {
            return Err(BackendError::io(ctx(), not_found("target subvolume missing")));
        }
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BackendError::Stream(format!("bad subvolume name {}", target.display())))?;

        let (parent_ref, parent_tree) = match parent {
            Some(p) => {
                if !is_real_dir(p) {
                    return Err(BackendError::io(ctx(), not_found("parent subvolume missing")));
                }
                let tree = tree::scan(p).map_err(|e| BackendError::io(ctx(), e))?;
                (parent_reference(p, target)?, tree)
            }
            None => (String::new(), BTreeMap::new()),
        };
        let target_tree = tree::scan(target).map_err(|e| BackendError::io(ctx(), e))?;

        let mut w = StreamWriter::new(out);
        w.header(name, &parent_ref).map_err(|e| BackendError::io(ctx(), e))?;
        emit_changes(&mut w, parent, &parent_tree, target, &target_tree)
            .map_err(|e| BackendError::io(ctx(), e))?;
        w.end().map_err(|e| BackendError::io(ctx(), e))?;
        debug!(
            "dircopy: sent {} ({} entries, parent={})",
            target.display(),
            target_tree.len(),
            if parent_ref.is_empty() { "-" } else { parent_ref.as_str() }
        );
        Ok(())
    }

    fn receive_diff(&self, input: &mut dyn Read, dst_parent: &Path) -> BackendResult<()> {
        let mut r = StreamReader::new(input);
        let (name, parent_ref) = r.header().map_err(stream_err)?;
        if !is_single_component(&name) {
            return Err(BackendError::Stream(format!("bad subvolume name '{}'", name)));
        }
        let dst = dst_parent.join(&name);
        let ctx = || format!("receive {}", dst.display());
        if fs::symlink_metadata(&dst).is_ok() {
            return Err(BackendError::io(
                ctx(),
                io::Error::new(io::ErrorKind::AlreadyExists, "subvolume exists"),
            ));
        }

        if parent_ref.is_empty() {
            fs::create_dir(&dst).map_err(|e| BackendError::io(ctx(), e))?;
        } else {
            let base = resolve_parent(dst_parent, &parent_ref)?;
            if !is_real_dir(&base) {
                return Err(BackendError::io(
                    ctx(),
                    not_found(&format!("parent subvolume {} missing", base.display())),
                ));
            }
            tree::copy_tree(&base, &dst, false).map_err(|e| BackendError::io(ctx(), e))?;
        }

        apply_records(&mut r, &dst)?;
        tree::set_tree_readonly(&dst, true).map_err(|e| BackendError::io(ctx(), e))?;
        debug!("dircopy: received {}", dst.display());
        Ok(())
    }
}

/// REMOVE для исчезнувших/сменивших тип элементов (только верхний уровень
/// удаляемого поддерева), затем MKDIR/WRITE/SYMLINK в порядке дерева.
fn emit_changes(
    w: &mut StreamWriter<'_>,
    parent: Option<&Path>,
    parent_tree: &BTreeMap<String, Node>,
    target: &Path,
    target_tree: &BTreeMap<String, Node>,
) -> io::Result<()> {
    // "a-x" и "a.b" сортируются между "a" и "a/b": помним все удалённые каталоги
    let mut removed_dirs: BTreeSet<&str> = BTreeSet::new();
    for (path, node) in parent_tree {
        if has_removed_ancestor(path, &removed_dirs) {
            continue;
        }
        if !same_kind(node, target_tree.get(path)) {
            w.remove(path)?;
            if *node == Node::Dir {
                removed_dirs.insert(path.as_str());
            }
        }
    }

    for (path, node) in target_tree {
        let before = parent_tree.get(path);
        match node {
            Node::Dir => {
                if before != Some(&Node::Dir) {
                    w.mkdir(path)?;
                }
            }
            Node::File { len } => {
                let src = tree::join_rel(target, path)?;
                if let (Some(Node::File { len: old }), Some(p)) = (before, parent) {
                    if old == len && tree::same_content(&tree::join_rel(p, path)?, &src)? {
                        continue;
                    }
                }
                let mut f = BufReader::new(File::open(&src)?);
                w.write_file(path, *len, &mut f)?;
            }
            Node::Symlink(link) => {
                if before != Some(node) {
                    let link = link.to_str().ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("non UTF-8 symlink target at '{}'", path),
                        )
                    })?;
                    w.symlink(path, link)?;
                }
            }
        }
    }
    Ok(())
}

fn has_removed_ancestor(path: &str, removed: &BTreeSet<&str>) -> bool {
    let mut cur = path;
    while let Some(i) = cur.rfind('/') {
        cur = &cur[..i];
        if removed.contains(cur) {
            return true;
        }
    }
    false
}

fn same_kind(a: &Node, b: Option<&Node>) -> bool {
    matches!(
        (a, b),
        (Node::Dir, Some(Node::Dir))
            | (Node::File { .. }, Some(Node::File { .. }))
            | (Node::Symlink(_), Some(Node::Symlink(_)))
    )
}

fn apply_records(r: &mut StreamReader<'_>, dst: &Path) -> BackendResult<()> {
    let ctx = || format!("receive {}", dst.display());
    loop {
        let rec = r.next_record().map_err(stream_err)?;
        match rec {
            Record::End => return Ok(()),
            Record::Mkdir(rel) => {
                let p = tree::join_rel(dst, &rel).map_err(stream_err)?;
                fs::create_dir(&p).map_err(|e| BackendError::io(ctx(), e))?;
            }
            Record::Write { path, len } => {
                let p = tree::join_rel(dst, &path).map_err(stream_err)?;
                if fs::symlink_metadata(&p).is_ok() {
                    tree::apply_readonly(&p, false).map_err(|e| BackendError::io(ctx(), e))?;
                }
                let f = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&p)
                    .map_err(|e| BackendError::io(ctx(), e))?;
                let mut bw = BufWriter::new(f);
                r.copy_payload(len, &mut bw).map_err(stream_err)?;
                bw.flush().map_err(|e| BackendError::io(ctx(), e))?;
            }
            Record::Symlink { path, target } => {
                let p = tree::join_rel(dst, &path).map_err(stream_err)?;
                if fs::symlink_metadata(&p).is_ok() {
                    tree::remove_any(&p).map_err(|e| BackendError::io(ctx(), e))?;
                }
                tree::make_symlink(Path::new(&target), &p)
                    .map_err(|e| BackendError::io(ctx(), e))?;
            }
            Record::Remove(rel) => {
                let p = tree::join_rel(dst, &rel).map_err(stream_err)?;
                tree::remove_any(&p).map_err(|e| BackendError::io(ctx(), e))?;
            }
        }
    }
}

/// Ссылка на родителя для заголовка потока.
fn parent_reference(parent: &Path, target: &Path) -> BackendResult<String> {
    let grand = target.parent().and_then(|p| p.parent());
    let rel = grand.and_then(|g| parent.strip_prefix(g).ok());
    let s = match rel {
        Some(r) => {
            let parts: Option<Vec<&str>> = r.components().map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();
            parts.map(|p| p.join("/"))
        }
        None => parent.to_str().map(|s| s.to_string()),
    };
    s.filter(|s| !s.is_empty())
        .ok_or_else(|| BackendError::Stream(format!("unusable parent path {}", parent.display())))
}

fn resolve_parent(dst_parent: &Path, parent_ref: &str) -> BackendResult<PathBuf> {
    let p = Path::new(parent_ref);
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    let base = dst_parent.parent().unwrap_or(dst_parent);
    tree::join_rel(base, parent_ref).map_err(stream_err)
}

fn is_single_component(name: &str) -> bool {
    let mut c = Path::new(name).components();
    matches!((c.next(), c.next()), (Some(Component::Normal(_)), None))
}

fn is_real_dir(p: &Path) -> bool {
    fs::symlink_metadata(p).map(|m| m.is_dir()).unwrap_or(false)
}

fn not_found(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, msg.to_string())
}

fn stream_err(e: io::Error) -> BackendError {
    BackendError::Stream(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(p: &Path, data: &[u8]) {
        if let Some(d) = p.parent() {
            fs::create_dir_all(d).unwrap();
        }
        fs::write(p, data).unwrap();
    }

    #[test]
    fn snapshot_is_readonly_and_deletable() {
        let dir = tempfile::tempdir().unwrap();
        let b = DirCopyBackend::new();
        let live = dir.path().join("vol1");
        write(&live.join("a/f"), b"1");
        let snap = dir.path().join("snap");
        b.snapshot(&live, &snap, true).unwrap();
        assert!(fs::metadata(snap.join("a/f")).unwrap().permissions().readonly());

        // повторный снапшот в существующий каталог — ошибка
        assert!(b.snapshot(&live, &snap, true).is_err());

        b.delete_subvolume(&snap).unwrap();
        assert!(!snap.exists());
        assert!(b.delete_subvolume(&snap).is_err());
    }

    #[test]
    fn incremental_stream_applies_on_another_root() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let b = DirCopyBackend::new();

        let s1 = src.path().join("snapshots/1/vol1");
        let s2 = src.path().join("snapshots/2/vol1");
        write(&s1.join("keep"), b"same");
        write(&s1.join("change"), b"old");
        write(&s1.join("gone/deep/x"), b"x");
        write(&s2.join("keep"), b"same");
        write(&s2.join("change"), b"new!");
        write(&s2.join("added/y"), b"y");

        // база на приёмнике
        let mut full = Vec::new();
        b.send_diff(None, &s1, &mut full).unwrap();
        let d1 = dst.path().join("snapshots/1");
        fs::create_dir_all(&d1).unwrap();
        b.receive_diff(&mut &full[..], &d1).unwrap();

        let mut inc = Vec::new();
        b.send_diff(Some(&s1), &s2, &mut inc).unwrap();
        assert!(inc.len() < full.len() + 64);
        let d2 = dst.path().join("snapshots/2");
        fs::create_dir_all(&d2).unwrap();
        b.receive_diff(&mut &inc[..], &d2).unwrap();

        let got = d2.join("vol1");
        assert_eq!(fs::read(got.join("keep")).unwrap(), b"same");
        assert_eq!(fs::read(got.join("change")).unwrap(), b"new!");
        assert_eq!(fs::read(got.join("added/y")).unwrap(), b"y");
        assert!(!got.join("gone").exists());
        assert!(fs::metadata(got.join("keep")).unwrap().permissions().readonly());
    }

    #[test]
    fn removed_siblings_with_shared_prefix() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let b = DirCopyBackend::new();

        let s1 = src.path().join("snapshots/1/vol1");
        let s2 = src.path().join("snapshots/2/vol1");
        // порядок в дереве: a, a-x, a-x/f, a.b, a.b/g, a/b, a/b/c
        write(&s1.join("a/b/c"), b"c");
        write(&s1.join("a-x/f"), b"f");
        write(&s1.join("a.b/g"), b"g");
        write(&s1.join("keep"), b"k");
        write(&s2.join("keep"), b"k");
        write(&s2.join("a.b"), b"now a file");

        let mut full = Vec::new();
        b.send_diff(None, &s1, &mut full).unwrap();
        let d1 = dst.path().join("snapshots/1");
        fs::create_dir_all(&d1).unwrap();
        b.receive_diff(&mut &full[..], &d1).unwrap();

        let mut inc = Vec::new();
        b.send_diff(Some(&s1), &s2, &mut inc).unwrap();
        let d2 = dst.path().join("snapshots/2");
        fs::create_dir_all(&d2).unwrap();
        b.receive_diff(&mut &inc[..], &d2).unwrap();

        let got = d2.join("vol1");
        assert!(!got.join("a").exists());
        assert!(!got.join("a-x").exists());
        assert_eq!(fs::read(got.join("a.b")).unwrap(), b"now a file");
        assert_eq!(fs::read(got.join("keep")).unwrap(), b"k");
    }

    #[test]
    fn ancestor_lookup() {
        let removed: BTreeSet<&str> = ["a", "a-x"].into_iter().collect();
        assert!(has_removed_ancestor("a/b", &removed));
        assert!(has_removed_ancestor("a/b/c", &removed));
        assert!(has_removed_ancestor("a-x/f", &removed));
        assert!(!has_removed_ancestor("a.b/g", &removed));
        assert!(!has_removed_ancestor("a", &removed));
    }

    #[test]
    fn incremental_without_base_fails() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let b = DirCopyBackend::new();
        let s1 = src.path().join("snapshots/1/vol1");
        let s2 = src.path().join("snapshots/2/vol1");
        write(&s1.join("f"), b"1");
        write(&s2.join("f"), b"2");

        let mut inc = Vec::new();
        b.send_diff(Some(&s1), &s2, &mut inc).unwrap();
        let d2 = dst.path().join("snapshots/2");
        fs::create_dir_all(&d2).unwrap();
        assert!(matches!(
            b.receive_diff(&mut &inc[..], &d2),
            Err(BackendError::Io { .. })
        ));
    }

    #[test]
    fn garbage_stream_is_stream_error() {
        let dst = tempfile::tempdir().unwrap();
        let b = DirCopyBackend::new();
        let junk = b"definitely not a stream".to_vec();
        assert!(matches!(
            b.receive_diff(&mut &junk[..], dst.path()),
            Err(BackendError::Stream(_))
        ));
    }

    #[test]
    fn probe_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let b = DirCopyBackend::new();
        assert!(b.probe(dir.path()).is_ok());
        let f = dir.path().join("file");
        write(&f, b"");
        assert!(matches!(b.probe(&f), Err(BackendError::Unsupported { .. })));
    }
}
