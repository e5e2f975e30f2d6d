//! Content hashing.
//!
//! Every exploration stores a SHA-256 digest of the content supplied at
//! write time; `verify_integrity` recomputes it later. The digest is the
//! lowercase hex encoding of the hash of the UTF-8 bytes.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the UTF-8 encoding of `content`.
pub fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            hash_content(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hash_content("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_lowercase_hex_64_chars() {
        let digest = hash_content("Content for Paper A");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(hash_content("same input"), hash_content("same input"));
        assert_ne!(hash_content("input a"), hash_content("input b"));
    }
}
