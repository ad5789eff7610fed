//! Snapshot chunk wire format and checksums
//!
//! A chunk carries one file of a snapshot. Every chunk of the same snapshot
//! advertises the same `snapshot_id`, `total_count` and `snapshot_checksum`;
//! the per-chunk `checksum` covers only that chunk's content. The
//! snapshot-level checksum runs over the concatenation of all chunk contents
//! in lexicographically sorted chunk-name order, so a missing or reordered
//! chunk is detected at the receiver.

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use bytes::Bytes;
use crc32fast::Hasher as Crc32Hasher;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{SnapshotError, SnapshotResult};

/// One file of a snapshot, transmitted as a single wire message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotChunk {
    /// Snapshot id (decimal rendering of the producing log position)
    pub snapshot_id: String,
    /// Number of chunks in this snapshot
    pub total_count: u32,
    /// File name within the snapshot directory
    pub chunk_name: String,
    /// Checksum over `content`
    pub checksum: u64,
    /// Checksum over all chunk contents in sorted chunk-name order
    pub snapshot_checksum: u64,
    /// Raw file bytes
    pub content: Bytes,
}

impl SnapshotChunk {
    /// Serialize the chunk for a byte-oriented transport
    pub fn encode(&self) -> SnapshotResult<Vec<u8>> {
        encode_to_vec(self, standard()).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    /// Deserialize a chunk received from a byte-oriented transport
    pub fn decode(data: &[u8]) -> SnapshotResult<Self> {
        decode_from_slice(data, standard())
            .map(|(chunk, _)| chunk)
            .map_err(|e| SnapshotError::Decode(e.to_string()))
    }
}

/// Checksum over a byte sequence (CRC32, widened to the u64 wire domain)
pub fn checksum_of(content: &[u8]) -> u64 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(content);
    hasher.finalize() as u64
}

/// Snapshot-level checksum of a snapshot directory.
///
/// Streams every file through one hasher in sorted file-name order instead
/// of concatenating the contents in memory.
pub fn checksum_of_directory(dir: &Path) -> std::io::Result<u64> {
    let mut hasher = Crc32Hasher::new();
    let mut buf = [0u8; 8 * 1024];

    for path in sorted_chunk_paths(dir)? {
        let mut reader = BufReader::new(File::open(&path)?);
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    Ok(hasher.finalize() as u64)
}

/// Files of a snapshot directory in sorted chunk-name order
pub fn sorted_chunk_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}
