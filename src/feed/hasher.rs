use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a raw feed body.
///
/// Only used as an equality check to skip reprocessing identical content.
pub fn make_content_hash(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    format!("{:x}", hash)
}
