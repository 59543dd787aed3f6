//! # Hashing Utilities
//!
//! Everything the settlement layer commits to is Keccak-256, the same
//! function the parent chain uses, so a contract can recompute any digest
//! we publish.
//!
//! Digests travel as lowercase hex without a `0x` prefix, and most of the
//! protocol hashes the UTF-8 bytes of *hex text* rather than raw bytes:
//! an internal tree node is `keccak256(left_hex ++ right_hex)`, not the
//! hash of 64 raw bytes. That is how the committed roots were defined from
//! the start, and the helpers below exist so nobody has to remember it.

use sha3::{Digest, Keccak256};

/// Compute the Keccak-256 digest of raw bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 of raw bytes, hex encoded.
pub fn keccak256_hex(data: &[u8]) -> String {
    hex::encode(keccak256(data))
}

/// Keccak-256 of the UTF-8 bytes of `text`, hex encoded.
///
/// ```
/// use childchain_protocol::crypto::hash_text;
///
/// assert_eq!(
///     hash_text(""),
///     "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
/// );
/// ```
pub fn hash_text(text: &str) -> String {
    keccak256_hex(text.as_bytes())
}

/// Hash the concatenation of several text fragments without building the
/// intermediate string.
pub fn hash_concat<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Strip an optional `0x` / `0X` prefix.
pub fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_empty_vector() {
        assert_eq!(
            keccak256_hex(b""),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn keccak_is_not_sha3_256() {
        // SHA3-256("") = a7ffc6f8...; Keccak-256 uses the original padding.
        assert_ne!(
            keccak256_hex(b""),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
    }

    #[test]
    fn keccak_abc_vector() {
        assert_eq!(
            hash_text("abc"),
            "4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
        );
    }

    #[test]
    fn hash_concat_matches_joined_text() {
        let joined = hash_text("leftright");
        assert_eq!(hash_concat(["left", "right"]), joined);
        assert_eq!(hash_concat(["le", "ftri", "ght"]), joined);
    }

    #[test]
    fn hash_concat_of_nothing_is_empty_hash() {
        assert_eq!(hash_concat(std::iter::empty()), hash_text(""));
    }

    #[test]
    fn digest_is_lowercase_64_hex() {
        let d = hash_text("child chain");
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn strip_prefix_variants() {
        assert_eq!(strip_hex_prefix("0xabc"), "abc");
        assert_eq!(strip_hex_prefix("0Xabc"), "abc");
        assert_eq!(strip_hex_prefix("abc"), "abc");
        assert_eq!(strip_hex_prefix(""), "");
    }
}
