//! Content hashing for change detection and upload identity.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a text body.
///
/// Used both for `smart`-mode change detection and as the natural identity of
/// direct uploads (which have no connector-assigned external id).
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
