//! Content digests for cached media.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hex digest of a blob payload.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
