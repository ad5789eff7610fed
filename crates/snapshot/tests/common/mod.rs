//! Shared fixtures for the snapshot integration tests

use snapshot::{SnapshotConfig, SnapshotReplication, SnapshotStorage, StateSnapshotController};
use statedb::RocksDbFactory;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Sender and receiver partitions wired to the same chunk transport
pub struct ReplicationSetup {
    pub sender: StateSnapshotController<RocksDbFactory>,
    pub receiver: StateSnapshotController<RocksDbFactory>,
    pub sender_storage: Arc<SnapshotStorage>,
    pub receiver_storage: Arc<SnapshotStorage>,
    _temp_dir: TempDir,
}

/// Build both partitions and open the sender database with some state in it
pub fn setup_replication(replicator: Arc<dyn SnapshotReplication>) -> ReplicationSetup {
    let temp_dir = TempDir::new().unwrap();

    let sender_config = SnapshotConfig::new(temp_dir.path().join("sender"));
    let sender_storage = Arc::new(SnapshotStorage::new(&sender_config).unwrap());
    let receiver_config = SnapshotConfig::new(temp_dir.path().join("receiver"));
    let receiver_storage = Arc::new(SnapshotStorage::new(&receiver_config).unwrap());

    let mut sender = StateSnapshotController::new(
        RocksDbFactory,
        Arc::clone(&sender_storage),
        Arc::clone(&replicator),
    );
    let receiver =
        StateSnapshotController::new(RocksDbFactory, Arc::clone(&receiver_storage), replicator);

    let db = sender.open_db().unwrap();
    db.put(b"workflow-instance-1", b"active").unwrap();
    db.put(b"workflow-instance-2", b"completed").unwrap();
    db.flush().unwrap();

    ReplicationSetup {
        sender,
        receiver,
        sender_storage,
        receiver_storage,
        _temp_dir: temp_dir,
    }
}

/// Sorted file names directly inside a directory
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}
