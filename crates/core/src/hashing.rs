//! SHA-256 helpers for build change detection.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Hash a file's contents.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

/// Fold several component digests into one, order-sensitively.
pub fn combine(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn combine_is_order_sensitive() {
        assert_ne!(combine(&["a", "b"]), combine(&["b", "a"]));
        assert_eq!(combine(&["a", "b"]), combine(&["a", "b"]));
    }

    #[test]
    fn combine_separates_parts() {
        assert_ne!(combine(&["ab", "c"]), combine(&["a", "bc"]));
    }

    #[test]
    fn file_hash_matches_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Dockerfile");
        std::fs::write(&path, b"FROM python:3.12\n").expect("write");
        assert_eq!(
            sha256_file(&path).expect("hash"),
            sha256_hex(b"FROM python:3.12\n")
        );
    }
}
