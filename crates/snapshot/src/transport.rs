//! In-process chunk transports
//!
//! The network transport carrying chunks between nodes lives outside this
//! crate; these implementations cover the two in-process cases: replication
//! switched off, and a channel-backed loopback with a consumer worker
//! thread.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::chunk::SnapshotChunk;
use crate::replication::{ChunkConsumer, SnapshotReplication};

/// Replication disabled: chunks are dropped and no subscription is armed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneReplication;

impl SnapshotReplication for NoneReplication {
    fn replicate(&self, _chunk: SnapshotChunk) {}

    fn consume(&self, _consumer: ChunkConsumer) {}
}

/// Channel-backed transport delivering chunks to the consumer on a worker
/// thread.
///
/// `close` drops the sending side and joins the worker, so every chunk
/// handed to `replicate` before the close has been consumed once `close`
/// returns.
pub struct ChannelReplication {
    tx: Mutex<Option<Sender<SnapshotChunk>>>,
    rx: Mutex<Option<Receiver<SnapshotChunk>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelReplication {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }
}

impl Default for ChannelReplication {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotReplication for ChannelReplication {
    fn replicate(&self, chunk: SnapshotChunk) {
        match self.tx.lock().as_ref() {
            Some(tx) => {
                if tx.send(chunk).is_err() {
                    warn!("chunk transport worker is gone, dropping chunk");
                }
            }
            None => warn!("chunk transport is closed, dropping chunk"),
        }
    }

    fn consume(&self, consumer: ChunkConsumer) {
        let rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None => {
                debug!("chunk subscription is already armed");
                return;
            }
        };

        let spawned = std::thread::Builder::new()
            .name("snapshot-chunk-consumer".to_string())
            .spawn(move || {
                for chunk in rx {
                    consumer(chunk);
                }
            });
        match spawned {
            Ok(handle) => *self.worker.lock() = Some(handle),
            Err(e) => warn!("failed to spawn chunk consumer thread: {}", e),
        }
    }

    fn close(&self) {
        // disconnect the channel, then wait for the worker to drain it
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("chunk consumer thread panicked");
            }
        }
    }
}
