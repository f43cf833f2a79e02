//! dircopy/tree — обход и копирование деревьев каталогов.
//!
//! Относительные пути внутри субволюма — UTF‑8 строки с '/' в качестве
//! разделителя. BTreeMap даёт порядок, в котором родитель всегда идёт раньше
//! потомков ("a" < "a/b").

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Dir,
    File { len: u64 },
    Symlink(PathBuf),
}

/// Все элементы дерева под `root` (сам root не включается).
pub(crate) fn scan(root: &Path) -> io::Result<BTreeMap<String, Node>> {
    let mut out = BTreeMap::new();
    walk(root, "", &mut out)?;
    Ok(out)
}

fn walk(dir: &Path, prefix: &str, out: &mut BTreeMap<String, Node>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_str().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non UTF-8 name under {}", dir.display()),
            )
        })?;
        let rel = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        let ft = entry.file_type()?;
        if ft.is_symlink() {
            let target = fs::read_link(entry.path())?;
            out.insert(rel, Node::Symlink(target));
        } else if ft.is_dir() {
            out.insert(rel.clone(), Node::Dir);
            walk(&entry.path(), &rel, out)?;
        } else {
            let len = entry.metadata()?.len();
            out.insert(rel, Node::File { len });
        }
    }
    Ok(())
}

/// Скопировать дерево `src` в новый каталог `dst`.
pub(crate) fn copy_tree(src: &Path, dst: &Path, readonly: bool) -> io::Result<()> {
    let nodes = scan(src)?;
    fs::create_dir(dst)?;
    for (rel, node) in &nodes {
        let d = join_rel(dst, rel)?;
        match node {
            Node::Dir => fs::create_dir(&d)?,
            Node::File { .. } => {
                fs::copy(join_rel(src, rel)?, &d)?;
                apply_readonly(&d, readonly)?;
            }
            Node::Symlink(target) => make_symlink(target, &d)?,
        }
    }
    Ok(())
}

/// Выставить/снять read-only у всех обычных файлов дерева.
/// Каталоги не трогаем: иначе удаление субволюма потребует обхода с chmod.
pub(crate) fn set_tree_readonly(root: &Path, readonly: bool) -> io::Result<()> {
    for (rel, node) in scan(root)? {
        if let Node::File { .. } = node {
            apply_readonly(&join_rel(root, &rel)?, readonly)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn apply_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perm = fs::metadata(path)?.permissions();
    let mode = perm.mode();
    let new_mode = if readonly { mode & !0o222 } else { mode | 0o200 };
    if new_mode != mode {
        perm.set_mode(new_mode);
        fs::set_permissions(path, perm)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn apply_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    let mut perm = fs::metadata(path)?.permissions();
    perm.set_readonly(readonly);
    fs::set_permissions(path, perm)
}

#[cfg(unix)]
pub(crate) fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub(crate) fn make_symlink(_target: &Path, link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symlinks are not supported here: {}", link.display()),
    ))
}

/// Побайтовое сравнение двух файлов одинаковой длины.
pub(crate) fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    let mut fa = io::BufReader::new(File::open(a)?);
    let mut fb = io::BufReader::new(File::open(b)?);
    let mut ba = [0u8; 64 * 1024];
    let mut bb = [0u8; 64 * 1024];
    loop {
        let na = read_full(&mut fa, &mut ba)?;
        let nb = read_full(&mut fb, &mut bb)?;
        if na != nb || ba[..na] != bb[..nb] {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
    }
}

fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..])? {
            0 => break,
            k => n += k,
        }
    }
    Ok(n)
}

/// Удалить элемент дерева любого вида.
pub(crate) fn remove_any(path: &Path) -> io::Result<()> {
    let md = fs::symlink_metadata(path)?;
    if md.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// base + относительный путь из потока. Отвергает абсолютные пути и "..".
pub(crate) fn join_rel(base: &Path, rel: &str) -> io::Result<PathBuf> {
    let p = Path::new(rel);
    let ok = !rel.is_empty() && p.components().all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsafe relative path '{}'", rel),
        ));
    }
    Ok(base.join(p))
}
