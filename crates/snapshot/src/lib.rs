//! Partition state snapshots for the workflow engine
//!
//! Periodically captures the materialized state of a partition's embedded
//! key-value database, persists it under the partition root, ships it to
//! other nodes as checksummed chunks, and bootstraps recovery after a crash
//! or leader change.
//!
//! Module layout:
//!
//! - `storage.rs` - on-disk snapshot lifecycle (pending, committed, runtime)
//! - `chunk.rs` - chunk wire format and checksums
//! - `replication.rs` - outbound chunk emission and inbound assembly
//! - `transport.rs` - in-process chunk transports
//! - `controller.rs` - lifecycle orchestration over the state database

pub mod chunk;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod replication;
pub mod storage;
pub mod transport;

pub use chunk::{checksum_of, checksum_of_directory, SnapshotChunk};
pub use config::{ConfigError, SnapshotConfig};
pub use controller::StateSnapshotController;
pub use error::{SnapshotError, SnapshotResult};
pub use metrics::SnapshotMetrics;
pub use replication::{
    ChunkConsumer, ChunkExecutor, InlineExecutor, ReplicationController, SnapshotReplication,
};
pub use storage::{Snapshot, SnapshotStorage};
pub use transport::{ChannelReplication, NoneReplication};
