//! On-disk snapshot storage for one partition
//!
//! Layout under the partition root:
//!
//! ```text
//! <root>/
//!   runtime/                   -- live database files while open
//!   pending/<id>/<chunkName>   -- in-progress snapshots (sender or receiver)
//!   snapshots/<id>/<chunkName> -- committed snapshots
//! ```
//!
//! `<id>` is the decimal rendering of the log position the snapshot captured.
//! Ids compare with natural-number semantics ("10" > "9"), never raw
//! lexicographic order. Committed directories are write-once; pending
//! directories may be overwritten by a later attempt with the same id.
//! Promotion from pending to committed is a same-filesystem rename, so a
//! crash leaves the snapshot either fully committed or still pending.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::SnapshotConfig;
use crate::error::SnapshotResult;
use crate::metrics::SnapshotMetrics;

const RUNTIME_DIRECTORY: &str = "runtime";
const PENDING_DIRECTORY: &str = "pending";
const SNAPSHOTS_DIRECTORY: &str = "snapshots";

/// An immutable directory of files capturing the state database at one log
/// position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    position: u64,
    path: PathBuf,
}

impl Snapshot {
    pub(crate) fn new(position: u64, path: PathBuf) -> Self {
        Self { position, path }
    }

    /// Snapshot id: the captured log position rendered as a decimal string
    pub fn id(&self) -> String {
        self.position.to_string()
    }

    /// Log position this snapshot captured
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Directory holding the snapshot files
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartialOrd for Snapshot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Snapshot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position.cmp(&other.position)
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot {}", self.position)
    }
}

/// Owner of all snapshot directories under one partition root
pub struct SnapshotStorage {
    root: PathBuf,
    max_retained_snapshots: usize,
    metrics: Arc<SnapshotMetrics>,
}

impl SnapshotStorage {
    /// Open storage over the configured partition root, creating the
    /// directory tree if needed
    pub fn new(config: &SnapshotConfig) -> SnapshotResult<Self> {
        let storage = Self {
            root: config.root_dir.clone(),
            max_retained_snapshots: config.max_retained_snapshots.max(1),
            metrics: Arc::new(SnapshotMetrics::new()),
        };
        std::fs::create_dir_all(storage.pending_root())?;
        std::fs::create_dir_all(storage.snapshots_root())?;
        Ok(storage)
    }

    fn pending_root(&self) -> PathBuf {
        self.root.join(PENDING_DIRECTORY)
    }

    fn snapshots_root(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIRECTORY)
    }

    /// Directory the live database reads and writes while open
    pub fn runtime_directory(&self) -> PathBuf {
        self.root.join(RUNTIME_DIRECTORY)
    }

    pub fn metrics(&self) -> &Arc<SnapshotMetrics> {
        &self.metrics
    }

    /// Pending directory for the given snapshot id, creating the parent tree
    /// if needed. Returns `None` if the id is malformed.
    pub fn pending_directory_for(&self, snapshot_id: &str) -> Option<PathBuf> {
        let position = match parse_snapshot_id(snapshot_id) {
            Some(position) => position,
            None => {
                warn!("malformed snapshot id {:?}", snapshot_id);
                return None;
            }
        };

        if let Err(e) = std::fs::create_dir_all(self.pending_root()) {
            warn!("failed to create pending directory tree: {}", e);
            return None;
        }
        Some(self.pending_root().join(position.to_string()))
    }

    /// Reserve a pending snapshot for the given log position.
    ///
    /// Returns `None` when a committed snapshot already covers the position,
    /// so no redundant snapshot is taken. A stale pending directory from a
    /// failed earlier attempt with the same id is discarded.
    pub fn pending_snapshot_for(&self, lower_bound_position: u64) -> Option<Snapshot> {
        if let Some(latest) = self.latest_snapshot() {
            if lower_bound_position <= latest.position() {
                debug!(
                    "position {} already covered by committed {}",
                    lower_bound_position, latest
                );
                return None;
            }
        }

        let path = self
            .pending_root()
            .join(lower_bound_position.to_string());
        if path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "failed to clear stale pending directory '{}': {}",
                    path.display(),
                    e
                );
                return None;
            }
        }
        if let Err(e) = std::fs::create_dir_all(self.pending_root()) {
            warn!("failed to create pending directory tree: {}", e);
            return None;
        }

        Some(Snapshot::new(lower_bound_position, path))
    }

    /// Atomically promote a pending snapshot to committed.
    ///
    /// Returns `None` if the pending directory is missing, or if a committed
    /// snapshot with the same id already exists; in the latter case the
    /// pending directory is discarded.
    pub fn commit_snapshot(&self, snapshot: Snapshot) -> Option<Snapshot> {
        if !snapshot.path().exists() {
            warn!("cannot commit {}: pending directory is missing", snapshot);
            return None;
        }

        let committed_path = self.snapshots_root().join(snapshot.id());
        if committed_path.exists() {
            warn!(
                "dropping pending {}: a committed snapshot with the same id already exists",
                snapshot
            );
            self.metrics.inc_discarded_pending_snapshots();
            if let Err(e) = std::fs::remove_dir_all(snapshot.path()) {
                warn!(
                    "failed to remove dropped pending directory '{}': {}",
                    snapshot.path().display(),
                    e
                );
            }
            return None;
        }

        if let Err(e) = std::fs::rename(snapshot.path(), &committed_path) {
            warn!("failed to commit {}: {}", snapshot, e);
            return None;
        }

        debug!("committed {}", snapshot);
        self.metrics.inc_committed_snapshots();
        Some(Snapshot::new(snapshot.position(), committed_path))
    }

    /// Enumerate committed snapshots. Order is unspecified; callers sort.
    pub fn snapshots(&self) -> impl Iterator<Item = Snapshot> {
        std::fs::read_dir(self.snapshots_root())
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                if !entry.file_type().ok()?.is_dir() {
                    return None;
                }
                let name = entry.file_name();
                match name.to_str().and_then(parse_snapshot_id) {
                    Some(position) => Some(Snapshot::new(position, entry.path())),
                    None => {
                        warn!("skipping non-snapshot directory entry {:?}", name);
                        None
                    }
                }
            })
    }

    /// Committed snapshot with the greatest position
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.snapshots().max()
    }

    /// True iff a committed snapshot with the given id exists
    pub fn exists(&self, snapshot_id: &str) -> bool {
        parse_snapshot_id(snapshot_id)
            .map(|position| self.snapshots_root().join(position.to_string()).exists())
            .unwrap_or(false)
    }

    /// Delete a committed snapshot
    pub fn delete_snapshot(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        debug!("deleting {}", snapshot);
        std::fs::remove_dir_all(snapshot.path())?;
        Ok(())
    }

    /// Remove committed snapshots beyond the retention bound, newest kept
    pub fn purge_old_snapshots(&self) -> SnapshotResult<()> {
        let mut snapshots: Vec<Snapshot> = self.snapshots().collect();
        snapshots.sort_by(|a, b| b.cmp(a));

        for snapshot in snapshots.into_iter().skip(self.max_retained_snapshots) {
            debug!("purging {} beyond retention bound", snapshot);
            std::fs::remove_dir_all(snapshot.path())?;
        }
        Ok(())
    }
}

fn parse_snapshot_id(id: &str) -> Option<u64> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}
