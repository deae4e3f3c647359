//! Content checksums.
//!
//! The digest stored beside each value in the KV store is:
//!
//! - algorithm: **SHA-256**
//! - input: the raw bytes of the value as fetched
//! - output: 64 lowercase hex digits, no prefix
//!
//! The bare hex form is what producers publish under `<prefix>/<key>/checksum`,
//! so it has to stay prefix-free.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Compute the hex SHA-256 digest of `content`.
pub fn compute(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let mut hex = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        let _ = write!(&mut hex, "{:02x}", b);
    }
    hex
}

/// True if `content` hashes to `expected`.
///
/// Hex case and surrounding whitespace in `expected` are ignored; an empty
/// `expected` never matches.
pub fn matches(content: &[u8], expected: &str) -> bool {
    let expected = expected.trim();
    if expected.is_empty() {
        return false;
    }
    compute(content).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_has_well_known_digest() {
        assert_eq!(
            compute(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_is_lowercase_hex_of_fixed_width() {
        let d = compute(b"hosts\n");
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn matches_ignores_case_and_trailing_newline() {
        let d = compute(b"abc");
        assert!(matches(b"abc", &d));
        assert!(matches(b"abc", &d.to_uppercase()));
        assert!(matches(b"abc", &format!("{d}\n")));
        assert!(!matches(b"abd", &d));
    }

    #[test]
    fn empty_expected_never_matches() {
        assert!(!matches(b"", ""));
        assert!(!matches(b"", "   "));
    }
}
