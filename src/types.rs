//! Core types shared by the diff engine, executor and live watcher.

use std::io::Read;
use std::path::Path;

/// ContentHash: BLAKE3 digest over the full content of a file
pub type ContentHash = [u8; 32];

/// ReplicaId: position of a replica in the participating replica list.
///
/// Index *i* refers to the same replica across every table and tree node of one run.
pub type ReplicaId = usize;

/// Hash a file's full content.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(*hasher.finalize().as_bytes())
}

/// Hash an in-memory buffer.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    *blake3::hash(bytes).as_bytes()
}

/// Short hex form used in log fields.
pub fn short_hash(hash: &ContentHash) -> String {
    hex::encode(&hash[..6])
}
