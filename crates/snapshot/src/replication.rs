//! Snapshot chunk replication
//!
//! The sender splits the latest committed snapshot into one chunk per file
//! and hands each send task to a caller-supplied executor. The receiver
//! subscribes to the transport and assembles inbound chunks into a pending
//! directory, validating per-chunk checksums on arrival and the
//! snapshot-level checksum on completion before asking storage to commit.
//!
//! Assembly progress is tracked in memory per snapshot id: the chunk counter,
//! the advertised total and the advertised snapshot checksum. Any validation
//! failure aborts the assembly, which deletes the pending directory; the next
//! chunk for that id starts a fresh assembly. A chunk carrying a different
//! snapshot checksum for an id under assembly means the sender restarted, so
//! the stale assembly is aborted and the new chunk seeds its replacement.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chunk::{checksum_of, checksum_of_directory, sorted_chunk_paths, SnapshotChunk};
use crate::error::SnapshotResult;
use crate::storage::{Snapshot, SnapshotStorage};

/// Transport seam carrying opaque snapshot chunks between partitions.
///
/// Any framing that preserves the chunk fields verbatim is acceptable; see
/// [`SnapshotChunk::encode`] for transports that need bytes on the wire.
pub trait SnapshotReplication: Send + Sync {
    /// Hand one chunk to the transport
    fn replicate(&self, chunk: SnapshotChunk);

    /// Arm the persistent subscription delivering inbound chunks
    fn consume(&self, consumer: ChunkConsumer);

    /// Release transport resources
    fn close(&self) {}
}

/// Callback invoked by the transport for every inbound chunk
pub type ChunkConsumer = Box<dyn Fn(SnapshotChunk) + Send + Sync>;

/// Executor running chunk send tasks.
///
/// Tasks are safe to run in parallel; they share only the already-computed
/// snapshot checksum and immutable file contents.
pub trait ChunkExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs every send task on the caller's thread
pub struct InlineExecutor;

impl ChunkExecutor for InlineExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

impl<F> ChunkExecutor for F
where
    F: Fn(Box<dyn FnOnce() + Send>),
{
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        self(task)
    }
}

/// In-memory progress of one inbound snapshot assembly
struct Assembly {
    snapshot_checksum: u64,
    total_count: u32,
    chunks_written: u32,
}

type Assemblies = Mutex<HashMap<String, Assembly>>;

/// Outbound chunk emission and inbound chunk assembly for one partition
pub struct ReplicationController {
    replication: Arc<dyn SnapshotReplication>,
    storage: Arc<SnapshotStorage>,
    assemblies: Arc<Assemblies>,
    armed: AtomicBool,
}

impl ReplicationController {
    pub fn new(replication: Arc<dyn SnapshotReplication>, storage: Arc<SnapshotStorage>) -> Self {
        Self {
            replication,
            storage,
            assemblies: Arc::new(Mutex::new(HashMap::new())),
            armed: AtomicBool::new(false),
        }
    }

    /// Split the latest committed snapshot into chunks and submit one send
    /// task per chunk to the executor. No-op when nothing is committed yet.
    pub fn replicate_latest(&self, executor: &impl ChunkExecutor) -> SnapshotResult<()> {
        let latest = match self.storage.latest_snapshot() {
            Some(latest) => latest,
            None => {
                debug!("no committed snapshot to replicate");
                return Ok(());
            }
        };
        debug!("start replicating latest {}", latest);

        // One streaming pass for the snapshot checksum, then one file at a
        // time for the chunk contents; peak memory stays at one file.
        let snapshot_checksum = checksum_of_directory(latest.path())?;
        let paths = sorted_chunk_paths(latest.path())?;
        let total_count = paths.len() as u32;

        for path in paths {
            let chunk_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    warn!("skipping chunk with non-UTF8 name '{}'", path.display());
                    continue;
                }
            };
            let content = Bytes::from(std::fs::read(&path)?);
            let chunk = SnapshotChunk {
                snapshot_id: latest.id(),
                total_count,
                chunk_name,
                checksum: checksum_of(&content),
                snapshot_checksum,
                content,
            };

            let replication = Arc::clone(&self.replication);
            let metrics = Arc::clone(self.storage.metrics());
            executor.execute(Box::new(move || {
                debug!("replicating snapshot chunk {}", chunk.chunk_name);
                metrics.inc_replicated_chunks();
                replication.replicate(chunk);
            }));
        }
        Ok(())
    }

    /// Arm the inbound subscription; idempotent
    pub fn consume_replicated_snapshots(&self) {
        if self.armed.swap(true, Ordering::SeqCst) {
            debug!("replicated snapshot consumer is already armed");
            return;
        }

        let storage = Arc::clone(&self.storage);
        let assemblies = Arc::clone(&self.assemblies);
        self.replication.consume(Box::new(move |chunk| {
            Self::write_replicated_chunk(&storage, &assemblies, chunk);
        }));
    }

    fn write_replicated_chunk(
        storage: &SnapshotStorage,
        assemblies: &Assemblies,
        chunk: SnapshotChunk,
    ) {
        // One chunk at a time; the transport may deliver concurrently with
        // the owner's lifecycle calls.
        let mut assemblies = assemblies.lock();

        let snapshot_id = chunk.snapshot_id.as_str();
        if storage.exists(snapshot_id) {
            debug!(
                "ignoring chunk {} for already committed snapshot {}",
                chunk.chunk_name, snapshot_id
            );
            return;
        }
        storage.metrics().inc_received_chunks();

        if checksum_of(&chunk.content) != chunk.checksum {
            warn!(
                "chunk {} of snapshot {} failed its checksum, aborting assembly",
                chunk.chunk_name, snapshot_id
            );
            Self::abort_assembly(storage, &mut assemblies, snapshot_id);
            return;
        }

        if !is_valid_chunk_name(&chunk.chunk_name) {
            warn!(
                "ignoring chunk with invalid name {:?} for snapshot {}",
                chunk.chunk_name, snapshot_id
            );
            return;
        }

        if assemblies
            .get(snapshot_id)
            .is_some_and(|a| a.snapshot_checksum != chunk.snapshot_checksum)
        {
            warn!(
                "snapshot {} is being replicated again, discarding the previous assembly",
                snapshot_id
            );
            Self::abort_assembly(storage, &mut assemblies, snapshot_id);
        }

        let pending_dir = match storage.pending_directory_for(snapshot_id) {
            Some(dir) => dir,
            None => return,
        };

        if pending_dir.join(&chunk.chunk_name).exists() {
            debug!(
                "ignoring duplicate chunk {} of snapshot {}",
                chunk.chunk_name, snapshot_id
            );
            return;
        }

        if let Err(e) = write_chunk_durably(&pending_dir, &chunk.chunk_name, &chunk.content) {
            // transient failure: keep the assembly for a retry
            warn!(
                "failed to write chunk {} of snapshot {}: {}",
                chunk.chunk_name, snapshot_id, e
            );
            return;
        }

        let assembly = assemblies
            .entry(snapshot_id.to_string())
            .or_insert(Assembly {
                snapshot_checksum: chunk.snapshot_checksum,
                total_count: chunk.total_count,
                chunks_written: 0,
            });
        assembly.chunks_written += 1;
        debug!(
            "wrote chunk {} ({}/{}) of snapshot {}",
            chunk.chunk_name, assembly.chunks_written, assembly.total_count, snapshot_id
        );

        if assembly.chunks_written < assembly.total_count {
            return;
        }

        Self::validate_and_commit(storage, &mut assemblies, &chunk, &pending_dir);
    }

    /// All advertised chunks are written: run the end-to-end validation and
    /// promote the assembly to a committed snapshot
    fn validate_and_commit(
        storage: &SnapshotStorage,
        assemblies: &mut HashMap<String, Assembly>,
        chunk: &SnapshotChunk,
        pending_dir: &Path,
    ) {
        let snapshot_id = chunk.snapshot_id.as_str();
        let actual = match checksum_of_directory(pending_dir) {
            Ok(actual) => actual,
            Err(e) => {
                warn!(
                    "failed to validate assembled snapshot {}: {}",
                    snapshot_id, e
                );
                return;
            }
        };

        if actual != chunk.snapshot_checksum {
            warn!(
                "assembled snapshot {} has checksum {} but {} was advertised, aborting assembly",
                snapshot_id, actual, chunk.snapshot_checksum
            );
            Self::abort_assembly(storage, assemblies, snapshot_id);
            return;
        }

        assemblies.remove(snapshot_id);
        if let Ok(position) = snapshot_id.parse::<u64>() {
            let pending = Snapshot::new(position, pending_dir.to_path_buf());
            if storage.commit_snapshot(pending).is_some() {
                debug!("committed replicated snapshot {}", snapshot_id);
            }
        }
    }

    /// Drop the in-memory assembly and its pending directory. Chunks of a
    /// fresh replication attempt recreate both.
    fn abort_assembly(
        storage: &SnapshotStorage,
        assemblies: &mut HashMap<String, Assembly>,
        snapshot_id: &str,
    ) {
        assemblies.remove(snapshot_id);
        storage.metrics().inc_aborted_assemblies();

        if let Some(dir) = storage.pending_directory_for(snapshot_id) {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    warn!(
                        "failed to remove aborted pending directory '{}': {}",
                        dir.display(),
                        e
                    );
                }
            }
        }
    }
}

fn is_valid_chunk_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Durable write: temp sibling first, then rename into place
fn write_chunk_durably(dir: &Path, chunk_name: &str, content: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!("{}.tmp", chunk_name));
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, dir.join(chunk_name))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotConfig;
    use tempfile::TempDir;

    /// Transport delivering replicated chunks straight to the armed consumer
    #[derive(Default)]
    struct DirectReplication {
        consumer: Mutex<Option<ChunkConsumer>>,
    }

    impl SnapshotReplication for DirectReplication {
        fn replicate(&self, chunk: SnapshotChunk) {
            if let Some(consumer) = self.consumer.lock().as_ref() {
                consumer(chunk);
            }
        }

        fn consume(&self, consumer: ChunkConsumer) {
            *self.consumer.lock() = Some(consumer);
        }
    }

    struct Receiver {
        _temp_dir: TempDir,
        storage: Arc<SnapshotStorage>,
        replication: Arc<DirectReplication>,
        _controller: ReplicationController,
    }

    fn receiver() -> Receiver {
        let temp_dir = TempDir::new().unwrap();
        let config = SnapshotConfig::new(temp_dir.path());
        let storage = Arc::new(SnapshotStorage::new(&config).unwrap());
        let replication = Arc::new(DirectReplication::default());
        let controller = ReplicationController::new(replication.clone(), storage.clone());
        controller.consume_replicated_snapshots();
        Receiver {
            _temp_dir: temp_dir,
            storage,
            replication,
            _controller: controller,
        }
    }

    fn chunk(
        snapshot_id: &str,
        total_count: u32,
        chunk_name: &str,
        content: &'static [u8],
        snapshot_checksum: u64,
    ) -> SnapshotChunk {
        SnapshotChunk {
            snapshot_id: snapshot_id.to_string(),
            total_count,
            chunk_name: chunk_name.to_string(),
            checksum: checksum_of(content),
            snapshot_checksum,
            content: Bytes::from_static(content),
        }
    }

    #[test]
    fn test_assembles_and_commits_complete_snapshot() {
        let receiver = receiver();
        let snapshot_checksum = checksum_of(b"firstsecond");

        receiver
            .replication
            .replicate(chunk("1", 2, "a.sst", b"first", snapshot_checksum));
        assert!(!receiver.storage.exists("1"));

        receiver
            .replication
            .replicate(chunk("1", 2, "b.sst", b"second", snapshot_checksum));

        assert!(receiver.storage.exists("1"));
        let pending = receiver.storage.pending_directory_for("1").unwrap();
        assert!(!pending.exists());
    }

    #[test]
    fn test_duplicate_chunk_is_ignored() {
        let receiver = receiver();
        let snapshot_checksum = checksum_of(b"firstsecond");

        let first = chunk("1", 2, "a.sst", b"first", snapshot_checksum);
        receiver.replication.replicate(first.clone());
        receiver.replication.replicate(first);
        assert!(!receiver.storage.exists("1"));

        receiver
            .replication
            .replicate(chunk("1", 2, "b.sst", b"second", snapshot_checksum));
        assert!(receiver.storage.exists("1"));
    }

    #[test]
    fn test_invalid_chunk_checksum_aborts_assembly() {
        let receiver = receiver();
        let snapshot_checksum = checksum_of(b"firstsecond");

        receiver
            .replication
            .replicate(chunk("1", 2, "a.sst", b"first", snapshot_checksum));

        let mut corrupted = chunk("1", 2, "b.sst", b"second", snapshot_checksum);
        corrupted.checksum = 0;
        receiver.replication.replicate(corrupted);

        let pending = receiver.storage.pending_directory_for("1").unwrap();
        assert!(!pending.exists());
        assert!(!receiver.storage.exists("1"));
        assert_eq!(receiver.storage.metrics().aborted_assemblies(), 1);
    }

    #[test]
    fn test_new_snapshot_checksum_restarts_assembly() {
        let receiver = receiver();

        // a first attempt that will never complete
        receiver
            .replication
            .replicate(chunk("1", 2, "a.sst", b"stale", checksum_of(b"stalestale")));

        // the sender restarted with different content
        let snapshot_checksum = checksum_of(b"firstsecond");
        receiver
            .replication
            .replicate(chunk("1", 2, "a.sst", b"first", snapshot_checksum));
        receiver
            .replication
            .replicate(chunk("1", 2, "b.sst", b"second", snapshot_checksum));

        assert!(receiver.storage.exists("1"));
        let committed = receiver.storage.latest_snapshot().unwrap();
        let content = std::fs::read(committed.path().join("a.sst")).unwrap();
        assert_eq!(content, b"first");
    }

    #[test]
    fn test_chunk_for_committed_snapshot_is_ignored() {
        let receiver = receiver();
        let snapshot_checksum = checksum_of(b"data");
        receiver
            .replication
            .replicate(chunk("1", 1, "a.sst", b"data", snapshot_checksum));
        assert!(receiver.storage.exists("1"));

        receiver
            .replication
            .replicate(chunk("1", 1, "late.sst", b"late", checksum_of(b"late")));

        let pending = receiver.storage.pending_directory_for("1").unwrap();
        assert!(!pending.exists());
        assert!(receiver.storage.exists("1"));
    }

    #[test]
    fn test_incomplete_snapshot_checksum_aborts_on_last_chunk() {
        let receiver = receiver();
        let snapshot_checksum = checksum_of(b"firstsecond");

        receiver
            .replication
            .replicate(chunk("1", 2, "a.sst", b"first", snapshot_checksum));

        // the first file vanishes out-of-band before the last chunk lands
        let pending = receiver.storage.pending_directory_for("1").unwrap();
        std::fs::remove_file(pending.join("a.sst")).unwrap();

        receiver
            .replication
            .replicate(chunk("1", 2, "b.sst", b"second", snapshot_checksum));

        assert!(!pending.exists());
        assert!(!receiver.storage.exists("1"));
    }

    #[test]
    fn test_consume_is_idempotent() {
        let receiver = receiver();
        // re-arming must not reset or double-register the subscription
        receiver._controller.consume_replicated_snapshots();

        let snapshot_checksum = checksum_of(b"data");
        receiver
            .replication
            .replicate(chunk("1", 1, "a.sst", b"data", snapshot_checksum));

        assert!(receiver.storage.exists("1"));
        assert_eq!(receiver.storage.metrics().received_chunks(), 1);
    }

    #[test]
    fn test_traversal_chunk_name_is_rejected() {
        let receiver = receiver();
        let snapshot_checksum = checksum_of(b"data");

        receiver
            .replication
            .replicate(chunk("1", 1, "../evil", b"data", snapshot_checksum));

        assert!(!receiver.storage.exists("1"));
        let pending = receiver.storage.pending_directory_for("1").unwrap();
        assert!(!pending.join("../evil").exists());
    }
}
