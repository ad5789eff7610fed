//! Embedded partition state database abstraction
//!
//! The snapshot subsystem needs exactly three capabilities from the state
//! database: open it over a directory, dump a consistent copy of its current
//! state into another directory, and release it. `StateDb`/`StateDbFactory`
//! form that seam; `RocksStateDb` is the production implementation. The
//! snapshot subsystem never inspects the files a database writes.

mod rocks;

pub use rocks::{RocksDbFactory, RocksStateDb};

use std::path::Path;

/// State database error
#[derive(Debug, thiserror::Error)]
pub enum StateDbError {
    #[error("failed to open database: {0}")]
    Open(String),
    #[error("failed to create snapshot: {0}")]
    Snapshot(String),
    #[error("database operation failed: {0}")]
    Backend(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to an open partition state database.
///
/// Dropping the handle flushes and releases the database files, so a
/// directory holding a closed database can be deleted or copied freely.
pub trait StateDb: Send {
    /// Write a consistent, self-contained copy of the current state into
    /// `target`. The target must be absent or empty; the copy is restartable
    /// only via [`StateDbFactory::create_db`] over the same directory.
    fn create_snapshot(&self, target: &Path) -> Result<(), StateDbError>;
}

/// Scoped acquisition of a state database over a directory.
pub trait StateDbFactory {
    type Db: StateDb;

    /// Open (or bootstrap) the database living in `directory`.
    fn create_db(&self, directory: &Path) -> Result<Self::Db, StateDbError>;
}
