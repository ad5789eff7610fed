//! Snapshot observability counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Counters and timings for snapshot lifecycle operations.
///
/// Plain atomics; a metrics reporter scrapes the getters.
#[derive(Debug, Default)]
pub struct SnapshotMetrics {
    snapshot_operations: AtomicU64,
    last_snapshot_duration_ms: AtomicU64,
    committed_snapshots: AtomicU64,
    discarded_pending_snapshots: AtomicU64,
    replicated_chunks: AtomicU64,
    received_chunks: AtomicU64,
    aborted_assemblies: AtomicU64,
}

impl SnapshotMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one snapshot-of-the-database operation and how long it took
    pub fn observe_snapshot_operation(&self, elapsed: Duration) {
        self.snapshot_operations.fetch_add(1, Ordering::Relaxed);
        self.last_snapshot_duration_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        debug!("snapshot operation took {:?}", elapsed);
    }

    pub(crate) fn inc_committed_snapshots(&self) {
        self.committed_snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_discarded_pending_snapshots(&self) {
        self.discarded_pending_snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_replicated_chunks(&self) {
        self.replicated_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_received_chunks(&self) {
        self.received_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_aborted_assemblies(&self) {
        self.aborted_assemblies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_operations(&self) -> u64 {
        self.snapshot_operations.load(Ordering::Relaxed)
    }

    pub fn last_snapshot_duration_ms(&self) -> u64 {
        self.last_snapshot_duration_ms.load(Ordering::Relaxed)
    }

    pub fn committed_snapshots(&self) -> u64 {
        self.committed_snapshots.load(Ordering::Relaxed)
    }

    /// Pending snapshots dropped because a committed snapshot with the same
    /// id already existed
    pub fn discarded_pending_snapshots(&self) -> u64 {
        self.discarded_pending_snapshots.load(Ordering::Relaxed)
    }

    pub fn replicated_chunks(&self) -> u64 {
        self.replicated_chunks.load(Ordering::Relaxed)
    }

    pub fn received_chunks(&self) -> u64 {
        self.received_chunks.load(Ordering::Relaxed)
    }

    pub fn aborted_assemblies(&self) -> u64 {
        self.aborted_assemblies.load(Ordering::Relaxed)
    }
}
