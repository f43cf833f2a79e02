use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use cowsnap::backend::BackendResult;
use cowsnap::{BackendError, CowBackend, DirCopyBackend, SnapshotError, SnapshotManager};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("cowsnap-fail-{prefix}-{pid}-{t}-{id}"))
}

const NEVER: usize = usize::MAX;

/// DirCopyBackend, у которого N-й вызов выбранного примитива (с 1) падает.
struct Scripted {
    inner: DirCopyBackend,
    fail_snapshot_at: AtomicUsize,
    fail_send_at: AtomicUsize,
    fail_receive_at: AtomicUsize,
    fail_delete_at: AtomicUsize,
    snapshots: AtomicUsize,
    sends: AtomicUsize,
    receives: AtomicUsize,
    deletes: AtomicUsize,
}

impl Scripted {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: DirCopyBackend::new(),
            fail_snapshot_at: AtomicUsize::new(NEVER),
            fail_send_at: AtomicUsize::new(NEVER),
            fail_receive_at: AtomicUsize::new(NEVER),
            fail_delete_at: AtomicUsize::new(NEVER),
            snapshots: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
            receives: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    /// Сбросить счётчики и назначить, какой вызов упадёт.
    fn arm(&self, counter: &AtomicUsize, fail_at: &AtomicUsize, n: usize) {
        counter.store(0, Ordering::SeqCst);
        fail_at.store(n, Ordering::SeqCst);
    }

    fn disarm(&self) {
        for f in [
            &self.fail_snapshot_at,
            &self.fail_send_at,
            &self.fail_receive_at,
            &self.fail_delete_at,
        ] {
            f.store(NEVER, Ordering::SeqCst);
        }
    }

    fn tick(counter: &AtomicUsize, fail_at: &AtomicUsize, what: &str) -> BackendResult<()> {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n == fail_at.load(Ordering::SeqCst) {
            return Err(BackendError::Command {
                command: format!("scripted {what}"),
                status: "exit status: 1".into(),
                stderr: format!("{what} call #{n} fails"),
            });
        }
        Ok(())
    }
}

impl CowBackend for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }
    fn probe(&self, path: &Path) -> BackendResult<()> {
        self.inner.probe(path)
    }
    fn create_subvolume(&self, path: &Path) -> BackendResult<()> {
        self.inner.create_subvolume(path)
    }
    fn delete_subvolume(&self, path: &Path) -> BackendResult<()> {
        Self::tick(&self.deletes, &self.fail_delete_at, "delete")?;
        self.inner.delete_subvolume(path)
    }
    fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> BackendResult<()> {
        Self::tick(&self.snapshots, &self.fail_snapshot_at, "snapshot")?;
        self.inner.snapshot(src, dst, readonly)
    }
    fn send_diff(&self, parent: Option<&Path>, target: &Path, out: &mut dyn Write) -> BackendResult<()> {
        Self::tick(&self.sends, &self.fail_send_at, "send")?;
        self.inner.send_diff(parent, target, out)
    }
    fn receive_diff(&self, input: &mut dyn Read, dst_parent: &Path) -> BackendResult<()> {
        Self::tick(&self.receives, &self.fail_receive_at, "receive")?;
        self.inner.receive_diff(input, dst_parent)
    }
}

const VOLS: [&str; 3] = ["vol1", "vol2", "vol3"];

fn open_store(prefix: &str, backend: Arc<Scripted>) -> Result<(PathBuf, SnapshotManager)> {
    let root = unique_root(prefix);
    for v in VOLS {
        fs::create_dir_all(root.join(v))?;
        fs::write(root.join(v).join("marker"), v.as_bytes())?;
    }
    let mgr = SnapshotManager::new(&root, &VOLS, backend)?;
    Ok((root, mgr))
}

fn expect_backend<T: std::fmt::Debug>(r: cowsnap::Result<T>, want: &Path) {
    match r {
        Err(SnapshotError::CannotPerformBtrfsOperation { path, source }) => {
            assert_eq!(path, want);
            assert!(matches!(source, BackendError::Command { .. }), "{source}");
        }
        other => panic!("expected CannotPerformBtrfsOperation({}), got {:?}", want.display(), other),
    }
}

#[test]
fn snapshot_stops_at_failing_volume() -> Result<()> {
    let b = Scripted::new();
    let (root, mgr) = open_store("snap", b.clone())?;

    for n in 1..=VOLS.len() {
        let id = n as u64;
        b.arm(&b.snapshots, &b.fail_snapshot_at, n);
        expect_backend(mgr.do_snapshot(id), &root.join(format!("snapshots/{id}/{}", VOLS[n - 1])));

        // тома до упавшего сняты, после него нет
        let dir = mgr.snapshot_dir(id);
        for (i, v) in VOLS.iter().enumerate() {
            assert_eq!(dir.join(v).is_dir(), i + 1 < n, "snapshot {id}, {v}");
        }
        assert_eq!(b.snapshots.load(Ordering::SeqCst), n);

        // частичный снапшот занимает id
        b.disarm();
        assert!(matches!(
            mgr.do_snapshot(id),
            Err(SnapshotError::SnapshotPresent { .. })
        ));
    }

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn diff_stops_at_failing_volume() -> Result<()> {
    let b = Scripted::new();
    let (root, mgr) = open_store("send", b.clone())?;
    mgr.do_snapshot(1)?;
    mgr.do_snapshot(2)?;

    b.arm(&b.sends, &b.fail_send_at, 2);
    expect_backend(mgr.make_diff(1, 2), &root.join("snapshots/2/vol2"));
    assert_eq!(b.sends.load(Ordering::SeqCst), 2);

    b.arm(&b.sends, &b.fail_send_at, 3);
    expect_backend(mgr.export_snapshot(2), &root.join("snapshots/2/vol3"));

    // ни одного недописанного артефакта
    let leftovers = fs::read_dir(mgr.diffs_dir())?.count();
    assert_eq!(leftovers, 0);

    b.disarm();
    let p = mgr.make_diff(1, 2)?;
    assert!(p.is_file());

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn import_stops_at_failing_volume() -> Result<()> {
    let b = Scripted::new();
    let (root, mgr) = open_store("recv", b.clone())?;
    mgr.do_snapshot(1)?;
    let full = mgr.export_snapshot(1)?;

    b.arm(&b.receives, &b.fail_receive_at, 2);
    expect_backend(mgr.import_diff(7, &full), &root.join("snapshots/7/vol2"));
    assert!(mgr.snapshot_dir(7).join("vol1").is_dir());
    assert!(!mgr.snapshot_dir(7).join("vol2").exists());
    assert!(!mgr.snapshot_dir(7).join("vol3").exists());

    b.disarm();
    mgr.import_diff(8, &full)?;
    assert_eq!(fs::read(mgr.snapshot_dir(8).join("vol3/marker"))?, b"vol3");

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn restore_keeps_earlier_volumes_on_failure() -> Result<()> {
    let b = Scripted::new();
    let (root, mgr) = open_store("restore", b.clone())?;
    mgr.do_snapshot(1)?;
    for v in VOLS {
        fs::write(root.join(v).join("marker"), b"changed")?;
    }

    // клон второго тома падает: vol1 уже восстановлен, vol2 и vol3 нетронуты
    b.arm(&b.snapshots, &b.fail_snapshot_at, 2);
    expect_backend(mgr.restore_snapshot(1), &root.join("snapshots/1/vol2"));
    assert_eq!(fs::read(root.join("vol1/marker"))?, b"vol1");
    assert_eq!(fs::read(root.join("vol2/marker"))?, b"changed");
    assert_eq!(fs::read(root.join("vol3/marker"))?, b"changed");

    // удаление живого vol3 падает: его клон остаётся в staging
    b.disarm();
    b.arm(&b.deletes, &b.fail_delete_at, 3);
    expect_backend(mgr.restore_snapshot(1), &root.join("vol3"));
    assert_eq!(fs::read(root.join("vol3/marker"))?, b"changed");
    assert!(root.join(".restore-vol3").is_dir());

    // следующий запуск подбирает застрявший staging
    b.disarm();
    mgr.restore_snapshot(1)?;
    for v in VOLS {
        assert_eq!(fs::read(root.join(v).join("marker"))?, v.as_bytes());
    }
    assert!(!root.join(".restore-vol3").exists());

    fs::remove_dir_all(&root)?;
    Ok(())
}
