//! Document keys for the LMDB store.
//!
//! LMDB rejects keys longer than 511 bytes. Document urls that fit are stored
//! verbatim so the database stays inspectable; longer urls are replaced by a
//! prefixed SHA-256 digest.

use sha2::{Digest, Sha256};

/// Largest key LMDB accepts with its default build options.
pub const MAX_KEY_LEN: usize = 511;

/// Prefix of digest keys. Never a valid url scheme, so it cannot collide with
/// a verbatim key.
const DIGEST_PREFIX: &[u8] = b"#sha256:";

/// A cache key derived from a document url.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    url: String,
}

impl DocumentKey {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether this key is stored as a digest rather than verbatim.
    pub fn is_hashed(&self) -> bool {
        self.url.len() > MAX_KEY_LEN
    }

    /// Encode this key for LMDB storage.
    ///
    /// Format: the url bytes, or `#sha256:<64 hex chars>` for long urls.
    pub fn encode(&self) -> Vec<u8> {
        if !self.is_hashed() {
            return self.url.as_bytes().to_vec();
        }

        let digest = Sha256::digest(self.url.as_bytes());
        let mut bytes = Vec::with_capacity(DIGEST_PREFIX.len() + 64);
        bytes.extend_from_slice(DIGEST_PREFIX);
        bytes.extend_from_slice(hex::encode(digest).as_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_url_is_verbatim() {
        let key = DocumentKey::new("https://pod.example/movies/spirit");
        assert!(!key.is_hashed());
        assert_eq!(key.encode(), b"https://pod.example/movies/spirit".to_vec());
    }

    #[test]
    fn test_long_url_is_hashed() {
        let url = format!("https://pod.example/{}", "a".repeat(600));
        let key = DocumentKey::new(url);
        let encoded = key.encode();

        assert!(key.is_hashed());
        assert!(encoded.starts_with(DIGEST_PREFIX));
        assert_eq!(encoded.len(), DIGEST_PREFIX.len() + 64);
    }

    #[test]
    fn test_boundary_length() {
        let exact = "x".repeat(MAX_KEY_LEN);
        assert_eq!(DocumentKey::new(exact.clone()).encode().len(), MAX_KEY_LEN);

        let over = "x".repeat(MAX_KEY_LEN + 1);
        assert!(DocumentKey::new(over).is_hashed());
    }

    proptest! {
        #[test]
        fn prop_encoded_key_fits_lmdb(url in ".{0,1200}") {
            let encoded = DocumentKey::new(url).encode();
            prop_assert!(encoded.len() <= MAX_KEY_LEN);
        }

        #[test]
        fn prop_distinct_long_urls_distinct_keys(suffix_a in "[a-z]{8}", suffix_b in "[a-z]{8}") {
            prop_assume!(suffix_a != suffix_b);
            let base = "p".repeat(600);
            let a = DocumentKey::new(format!("{}{}", base, suffix_a)).encode();
            let b = DocumentKey::new(format!("{}{}", base, suffix_b)).encode();
            prop_assert_ne!(a, b);
        }
    }
}
