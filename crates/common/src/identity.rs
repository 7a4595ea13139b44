//! Deterministic chunk identifiers

use sha2::{Digest, Sha256};

/// Hex characters of the source digest kept in every id
pub const SOURCE_PREFIX_LEN: usize = 16;

/// Id for chunk `sequence_index` of `source_name`.
///
/// Same input, same id, across runs and processes. Ids from different
/// sources only collide if the truncated 64-bit digests do.
pub fn assign_id(source_name: &str, sequence_index: usize) -> String {
    format!("{}-{}", source_prefix(source_name), sequence_index)
}

/// The shared prefix of every id assigned to `source_name`
pub fn source_prefix(source_name: &str) -> String {
    let digest = Sha256::digest(source_name.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(SOURCE_PREFIX_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(assign_id("abc", 0), "ba7816bf8f01cfea-0");
        assert_eq!(assign_id("abc", 12), "ba7816bf8f01cfea-12");
    }

    #[test]
    fn test_deterministic() {
        let first: Vec<String> = (0..50).map(|i| assign_id("annual-report", i)).collect();
        let second: Vec<String> = (0..50).map(|i| assign_id("annual-report", i)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unique_within_source() {
        let ids: std::collections::HashSet<String> =
            (0..1000).map(|i| assign_id("doc", i)).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_prefix_shape() {
        let prefix = source_prefix("some/source name.txt");
        assert_eq!(prefix.len(), SOURCE_PREFIX_LEN);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(assign_id("some/source name.txt", 3).starts_with(&prefix));
    }
}
