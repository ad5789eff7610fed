//! RocksDB-backed state database
//!
//! Snapshots use RocksDB checkpoints: hard links of the immutable SST files
//! plus copies of the WAL and manifest. A checkpoint directory opens as a
//! standalone database, which is what recovery relies on.

use rocksdb::checkpoint::Checkpoint;
use rocksdb::{Options, DB};
use std::path::Path;
use tracing::debug;

use crate::{StateDb, StateDbError, StateDbFactory};

/// Partition state database backed by RocksDB.
pub struct RocksStateDb {
    db: DB,
}

impl RocksStateDb {
    fn open(directory: &Path) -> Result<Self, StateDbError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, directory).map_err(|e| StateDbError::Open(e.to_string()))?;
        debug!("opened state database at '{}'", directory.display());

        Ok(Self { db })
    }

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StateDbError> {
        self.db
            .put(key, value)
            .map_err(|e| StateDbError::Backend(e.to_string()))
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateDbError> {
        self.db
            .get(key)
            .map_err(|e| StateDbError::Backend(e.to_string()))
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<(), StateDbError> {
        self.db
            .flush()
            .map_err(|e| StateDbError::Backend(e.to_string()))
    }
}

impl StateDb for RocksStateDb {
    fn create_snapshot(&self, target: &Path) -> Result<(), StateDbError> {
        // Checkpoint refuses to write into an existing directory. The storage
        // layer may have reserved the target as an empty directory; clear it.
        if target.exists() {
            if std::fs::read_dir(target)?.next().is_some() {
                return Err(StateDbError::Snapshot(format!(
                    "target directory '{}' is not empty",
                    target.display()
                )));
            }
            std::fs::remove_dir(target)?;
        }

        let checkpoint =
            Checkpoint::new(&self.db).map_err(|e| StateDbError::Snapshot(e.to_string()))?;
        checkpoint
            .create_checkpoint(target)
            .map_err(|e| StateDbError::Snapshot(e.to_string()))?;

        debug!("created checkpoint at '{}'", target.display());
        Ok(())
    }
}

/// Factory opening [`RocksStateDb`] instances.
#[derive(Debug, Clone, Default)]
pub struct RocksDbFactory;

impl StateDbFactory for RocksDbFactory {
    type Db = RocksStateDb;

    fn create_db(&self, directory: &Path) -> Result<RocksStateDb, StateDbError> {
        RocksStateDb::open(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get() {
        let temp_dir = TempDir::new().unwrap();
        let db = RocksDbFactory.create_db(temp_dir.path()).unwrap();

        db.put(b"key", b"value").unwrap();
        assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(db.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_checkpoint_reopens_as_database() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = temp_dir.path().join("runtime");
        let snapshot = temp_dir.path().join("snapshot");

        let db = RocksDbFactory.create_db(&runtime).unwrap();
        db.put(b"key", b"value").unwrap();
        db.create_snapshot(&snapshot).unwrap();
        drop(db);

        let restored = RocksDbFactory.create_db(&snapshot).unwrap();
        assert_eq!(restored.get(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_checkpoint_into_reserved_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = temp_dir.path().join("runtime");
        let snapshot = temp_dir.path().join("snapshot");
        std::fs::create_dir_all(&snapshot).unwrap();

        let db = RocksDbFactory.create_db(&runtime).unwrap();
        db.put(b"key", b"value").unwrap();
        db.create_snapshot(&snapshot).unwrap();

        assert!(snapshot.join("CURRENT").exists());
    }

    #[test]
    fn test_checkpoint_into_non_empty_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = temp_dir.path().join("runtime");
        let snapshot = temp_dir.path().join("snapshot");
        std::fs::create_dir_all(&snapshot).unwrap();
        std::fs::write(snapshot.join("stray"), b"data").unwrap();

        let db = RocksDbFactory.create_db(&runtime).unwrap();
        assert!(db.create_snapshot(&snapshot).is_err());
    }
}
