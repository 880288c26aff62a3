//! Identity types for SECTORSCOPE records

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Snapshot batch identifier using UUIDv7 for timestamp-sortable IDs.
/// Later collection runs always sort after earlier ones.
pub type BatchId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash used to detect corrupted archive payloads.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 BatchId (timestamp-sortable).
pub fn new_batch_id() -> BatchId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encoded SHA-256 of content, as stored next to serialized payloads.
pub fn content_hash_hex(content: &[u8]) -> String {
    hex::encode(compute_content_hash(content))
}
