//! Snapshot subsystem error types

use thiserror::Error;

/// Snapshot subsystem error
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Transient filesystem failure; pending state is left in place for retry
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// State database failure
    #[error(transparent)]
    Db(#[from] statedb::StateDbError),
    /// Lifecycle call made while the database handle is in the wrong state
    #[error("database is not open")]
    DbNotOpen,
    /// Recovery precondition: the database must be closed
    #[error("database is still open")]
    DbStillOpen,
    /// Committed snapshots existed but none of them could be opened
    #[error("failed to recover from snapshots, no openable snapshot left")]
    RecoveryFailed,
    /// Chunk wire encoding failed
    #[error("failed to encode snapshot chunk: {0}")]
    Encode(String),
    /// Chunk wire decoding failed
    #[error("failed to decode snapshot chunk: {0}")]
    Decode(String),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;
