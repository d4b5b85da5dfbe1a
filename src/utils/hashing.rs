//! Hashing utility for computing credential digests
//!
//! The credential store keeps passwords as the hex encoded MD5 of the
//! configured salt followed by the plain text password. The digest format
//! is dictated by the store so it must stay byte compatible regardless of
//! which schema the server is pointed at.

use md5::{Digest, Md5};

/// Computes the lowercase 32 character hex digest for the provided
/// salt and plain text password
///
/// `salt`     The configured credential salt (may be empty)
/// `password` The plain text password bytes
pub fn credential_digest(salt: &str, password: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(salt.as_bytes());
    hasher.update(password);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod test {
    use super::credential_digest;

    /// Tests the digest is the well known MD5 of the concatenated input
    #[test]
    fn test_known_digest() {
        // MD5 of the empty input
        assert_eq!(
            credential_digest("", b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        // MD5 of "abc" with the salt providing the leading byte
        assert_eq!(
            credential_digest("a", b"bc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    /// Tests the digest shape: deterministic, lowercase, 32 hex chars
    #[test]
    fn test_digest_shape() {
        let first = credential_digest("salt", b"hunter2");
        let second = credential_digest("salt", b"hunter2");
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first
            .chars()
            .all(|value| value.is_ascii_hexdigit() && !value.is_ascii_uppercase()));

        // Salt must contribute to the digest
        assert_ne!(first, credential_digest("other", b"hunter2"));
    }
}
