//! Lightweight metrics of one snapshot store.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Snapshots (create / restore)
//! - Diff artifacts (make_diff / export / import)
//! - Transfer (fragments served to peers)
//!
//! Счётчики принадлежат экземпляру SnapshotManager (StoreOptions::metrics
//! позволяет нескольким хранилищам писать в один общий набор).
//! Логика хранилища никогда не читает эти счётчики; это только наблюдаемость.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StoreMetrics {
    // ----- Snapshots -----
    snapshots_created: AtomicU64,
    snapshots_failed: AtomicU64,
    restores_done: AtomicU64,
    restores_failed: AtomicU64,

    // ----- Diff artifacts -----
    diffs_made: AtomicU64,
    diffs_failed: AtomicU64,
    diff_bytes: AtomicU64,
    imports_done: AtomicU64,
    imports_failed: AtomicU64,

    // ----- Transfer -----
    fragments_served: AtomicU64,
    fragment_bytes: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    // Snapshots
    pub snapshots_created: u64,
    pub snapshots_failed: u64,
    pub restores_done: u64,
    pub restores_failed: u64,

    // Diff artifacts
    pub diffs_made: u64,
    pub diffs_failed: u64,
    pub diff_bytes: u64,
    pub imports_done: u64,
    pub imports_failed: u64,

    // Transfer
    pub fragments_served: u64,
    pub fragment_bytes: u64,
}

impl MetricsSnapshot {
    pub fn avg_diff_bytes(&self) -> f64 {
        if self.diffs_made == 0 {
            0.0
        } else {
            self.diff_bytes as f64 / self.diffs_made as f64
        }
    }

    /// Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 11] = [
            ("cowsnap_snapshots_created_total", "Snapshots created", self.snapshots_created),
            ("cowsnap_snapshots_failed_total", "Snapshot creations failed", self.snapshots_failed),
            ("cowsnap_restores_total", "Snapshots restored into live volumes", self.restores_done),
            ("cowsnap_restores_failed_total", "Restores failed", self.restores_failed),
            ("cowsnap_diffs_total", "Diff artifacts produced", self.diffs_made),
            ("cowsnap_diffs_failed_total", "Diff artifact productions failed", self.diffs_failed),
            ("cowsnap_diff_bytes_total", "Bytes written into diff artifacts", self.diff_bytes),
            ("cowsnap_imports_total", "Diff artifacts imported", self.imports_done),
            ("cowsnap_imports_failed_total", "Diff imports failed", self.imports_failed),
            ("cowsnap_fragments_served_total", "Artifact fragments served", self.fragments_served),
            ("cowsnap_fragment_bytes_total", "Artifact bytes served", self.fragment_bytes),
        ];
        let mut s = String::new();
        for (name, help, v) in rows {
            let _ = writeln!(s, "# HELP {} {}", name, help);
            let _ = writeln!(s, "# TYPE {} counter", name);
            let _ = writeln!(s, "{} {}", name, v);
        }
        s
    }
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- Recorders (Snapshots) -----
    pub fn record_snapshot_created(&self) {
        self.snapshots_created.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_snapshot_failed(&self) {
        self.snapshots_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restore_done(&self) {
        self.restores_done.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_restore_failed(&self) {
        self.restores_failed.fetch_add(1, Ordering::Relaxed);
    }

    // ----- Recorders (Diff artifacts) -----
    pub fn record_diff_made(&self, bytes: u64) {
        self.diffs_made.fetch_add(1, Ordering::Relaxed);
        self.diff_bytes.fetch_add(bytes, Ordering::Relaxed);
    }
    pub fn record_diff_failed(&self) {
        self.diffs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_import_done(&self) {
        self.imports_done.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_import_failed(&self) {
        self.imports_failed.fetch_add(1, Ordering::Relaxed);
    }

    // ----- Recorders (Transfer) -----
    pub fn record_fragment_served(&self, bytes: usize) {
        self.fragments_served.fetch_add(1, Ordering::Relaxed);
        self.fragment_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // ----- Snapshot / Reset -----
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            snapshots_created: self.snapshots_created.load(Ordering::Relaxed),
            snapshots_failed: self.snapshots_failed.load(Ordering::Relaxed),
            restores_done: self.restores_done.load(Ordering::Relaxed),
            restores_failed: self.restores_failed.load(Ordering::Relaxed),

            diffs_made: self.diffs_made.load(Ordering::Relaxed),
            diffs_failed: self.diffs_failed.load(Ordering::Relaxed),
            diff_bytes: self.diff_bytes.load(Ordering::Relaxed),
            imports_done: self.imports_done.load(Ordering::Relaxed),
            imports_failed: self.imports_failed.load(Ordering::Relaxed),

            fragments_served: self.fragments_served.load(Ordering::Relaxed),
            fragment_bytes: self.fragment_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.snapshots_created,
            &self.snapshots_failed,
            &self.restores_done,
            &self.restores_failed,
            &self.diffs_made,
            &self.diffs_failed,
            &self.diff_bytes,
            &self.imports_done,
            &self.imports_failed,
            &self.fragments_served,
            &self.fragment_bytes,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_rendering() {
        let m = MetricsSnapshot {
            snapshots_created: 3,
            diff_bytes: 42,
            ..Default::default()
        };
        let text = m.to_prometheus();
        assert!(text.contains("# TYPE cowsnap_snapshots_created_total counter\n"));
        assert!(text.contains("cowsnap_snapshots_created_total 3\n"));
        assert!(text.contains("cowsnap_diff_bytes_total 42\n"));
        assert_eq!(m.avg_diff_bytes(), 0.0);
    }

    #[test]
    fn counters_are_per_instance() {
        let a = StoreMetrics::new();
        let b = StoreMetrics::new();
        a.record_snapshot_created();
        a.record_diff_made(100);
        a.record_diff_made(50);
        b.record_fragment_served(7);

        let sa = a.snapshot();
        assert_eq!(sa.snapshots_created, 1);
        assert_eq!(sa.diffs_made, 2);
        assert_eq!(sa.avg_diff_bytes(), 75.0);
        assert_eq!(sa.fragments_served, 0);
        assert_eq!(b.snapshot().fragment_bytes, 7);

        a.reset();
        assert_eq!(a.snapshot(), MetricsSnapshot::default());
    }
}
