//! Content hashing.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of the whitespace-normalized, lowercased text.
///
/// Two bodies that differ only in spacing or case hash identically.
pub fn content_hash(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_whitespace_and_case() {
        assert_eq!(
            content_hash("Flood  warning\nissued"),
            content_hash("flood warning issued")
        );
        assert_ne!(content_hash("flood"), content_hash("drought"));
        assert_eq!(content_hash("x").len(), 64);
    }
}
