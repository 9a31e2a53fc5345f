//! Content hashing for image deduplication
//!
//! SHA-256 of the raw upload bytes, hex-encoded (64 lowercase characters).
//! The digest is both the image_metadata primary key and the join key
//! stored on prediction_log.

use sha2::{Digest, Sha256};

/// Length of a content hash string
pub const HASH_LEN: usize = 64;

/// Calculate SHA-256 hash of in-memory content
pub fn hash_bytes(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    format!("{:x}", hash)
}
