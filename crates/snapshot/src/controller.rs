//! Snapshot lifecycle orchestration for one partition
//!
//! One logical actor owns the database handle and serializes all lifecycle
//! calls; the controller is that actor's API. It glues the state database
//! (capture), snapshot storage (persistence) and the replication controller
//! (shipping) together, and drives recovery after a crash or leader change.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use statedb::{StateDb, StateDbFactory};

use crate::error::{SnapshotError, SnapshotResult};
use crate::replication::{ChunkExecutor, ReplicationController, SnapshotReplication};
use crate::storage::{Snapshot, SnapshotStorage};
use crate::transport::NoneReplication;

/// Controls how snapshot and recovery operations are performed
pub struct StateSnapshotController<F: StateDbFactory> {
    storage: Arc<SnapshotStorage>,
    db_factory: F,
    replication: ReplicationController,
    db: Option<F::Db>,
}

impl<F: StateDbFactory> StateSnapshotController<F> {
    pub fn new(
        db_factory: F,
        storage: Arc<SnapshotStorage>,
        replication: Arc<dyn SnapshotReplication>,
    ) -> Self {
        let replication = ReplicationController::new(replication, Arc::clone(&storage));
        Self {
            storage,
            db_factory,
            replication,
            db: None,
        }
    }

    /// Controller for a partition that does not replicate its snapshots
    pub fn without_replication(db_factory: F, storage: Arc<SnapshotStorage>) -> Self {
        Self::new(db_factory, storage, Arc::new(NoneReplication))
    }

    /// Capture the open database into a pending snapshot for the given log
    /// position. Soft failure: returns `None` when the position is already
    /// covered, the database is closed, or the capture fails; the pending
    /// directory is left as-is for a retry or cleanup.
    pub fn take_temp_snapshot(&mut self, lower_bound_position: u64) -> Option<Snapshot> {
        let pending = self.storage.pending_snapshot_for(lower_bound_position)?;
        if self.create_snapshot(&pending) {
            Some(pending)
        } else {
            None
        }
    }

    /// Capture and commit a snapshot for the given log position
    pub fn take_snapshot(&mut self, lower_bound_position: u64) -> Option<Snapshot> {
        let pending = self.take_temp_snapshot(lower_bound_position)?;
        let committed = self.commit_snapshot(pending);
        if committed.is_some() {
            if let Err(e) = self.storage.purge_old_snapshots() {
                warn!("failed to purge old snapshots: {}", e);
            }
        }
        committed
    }

    /// Promote a pending snapshot to committed
    pub fn commit_snapshot(&self, snapshot: Snapshot) -> Option<Snapshot> {
        self.storage.commit_snapshot(snapshot)
    }

    /// Ship the latest committed snapshot as chunks via the executor
    pub fn replicate_latest_snapshot(&self, executor: &impl ChunkExecutor) -> SnapshotResult<()> {
        self.replication.replicate_latest(executor)
    }

    /// Arm the inbound replication subscription; idempotent
    pub fn consume_replicated_snapshots(&self) {
        self.replication.consume_replicated_snapshots();
    }

    /// Rebuild the runtime directory from the newest committed snapshot that
    /// opens cleanly.
    ///
    /// A corrupt newest snapshot must not block the partition: failing
    /// candidates are deleted and the next-newest is tried, at the cost of
    /// replaying more log. With no snapshots at all the runtime starts from
    /// scratch. When snapshots existed but none opened, the error is fatal
    /// and the caller must escalate.
    pub fn recover(&mut self) -> SnapshotResult<()> {
        if self.db.is_some() {
            error!("cannot recover while the database is open");
            return Err(SnapshotError::DbStillOpen);
        }

        let runtime = self.storage.runtime_directory();
        if runtime.exists() {
            std::fs::remove_dir_all(&runtime)?;
        }

        let mut snapshots: Vec<Snapshot> = self.storage.snapshots().collect();
        snapshots.sort_by(|a, b| b.cmp(a));
        debug!(
            "available snapshots: [{}]",
            snapshots
                .iter()
                .map(|s| s.id())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut candidates = snapshots.into_iter().peekable();
        while let Some(snapshot) = candidates.next() {
            copy_directory(snapshot.path(), &runtime)?;

            // opening the database verifies that the snapshot is recoverable
            match self.ensure_db_open() {
                Ok(()) => {
                    debug!("recovered state from {}", snapshot);
                    return Ok(());
                }
                Err(e) => {
                    self.db = None;
                    if runtime.exists() {
                        std::fs::remove_dir_all(&runtime)?;
                    }

                    if candidates.peek().is_some() {
                        warn!(
                            "failed to open {}: {}; deleting it and trying the previous one",
                            snapshot, e
                        );
                        self.storage.delete_snapshot(&snapshot)?;
                    } else {
                        error!(
                            "failed to open {}: {}; no snapshots left to recover from, \
                             manual action is required",
                            snapshot, e
                        );
                        return Err(SnapshotError::RecoveryFailed);
                    }
                }
            }
        }

        // no snapshot available: the engine starts from scratch
        Ok(())
    }

    /// Open the database over the runtime directory. Idempotent: while open,
    /// the existing handle is returned without re-opening.
    pub fn open_db(&mut self) -> SnapshotResult<&F::Db> {
        self.ensure_db_open()?;
        self.db.as_ref().ok_or(SnapshotError::DbNotOpen)
    }

    fn ensure_db_open(&mut self) -> SnapshotResult<()> {
        if self.db.is_none() {
            let runtime = self.storage.runtime_directory();
            let db = self.db_factory.create_db(&runtime)?;
            debug!("opened database from '{}'", runtime.display());
            self.db = Some(db);
        }
        Ok(())
    }

    /// Close the database handle, flushing and releasing its files
    pub fn close(&mut self) {
        if self.db.take().is_some() {
            debug!(
                "closed database from '{}'",
                self.storage.runtime_directory().display()
            );
        }
    }

    pub fn is_db_opened(&self) -> bool {
        self.db.is_some()
    }

    /// Number of committed snapshots
    pub fn valid_snapshots_count(&self) -> usize {
        self.storage.snapshots().count()
    }

    /// Directory of the newest committed snapshot
    pub fn last_valid_snapshot_directory(&self) -> Option<PathBuf> {
        self.storage
            .latest_snapshot()
            .map(|snapshot| snapshot.path().to_path_buf())
    }

    fn create_snapshot(&mut self, snapshot: &Snapshot) -> bool {
        let db = match self.db.as_ref() {
            Some(db) => db,
            None => {
                error!("expected to take a snapshot, but no database was opened");
                return false;
            }
        };

        debug!("taking temporary snapshot into '{}'", snapshot.path().display());
        let start = Instant::now();
        if let Err(e) = db.create_snapshot(snapshot.path()) {
            error!("failed to create snapshot of runtime database: {}", e);
            return false;
        }
        self.storage
            .metrics()
            .observe_snapshot_operation(start.elapsed());

        true
    }
}

fn copy_directory(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_directory(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
