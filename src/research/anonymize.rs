//! Stable anonymous ids for research exports.

use crate::types::UserId;
use sha2::{Digest, Sha256};

/// First 16 hex characters of SHA-256 over the decimal user id.
pub fn anonymize(user_id: UserId) -> String {
    let digest = Sha256::digest(user_id.to_string().as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_digest() {
        // sha256("1") = 6b86b273ff34fce1...
        assert_eq!(anonymize(1), "6b86b273ff34fce1");
    }

    #[test]
    fn is_deterministic_and_distinct() {
        assert_eq!(anonymize(42), anonymize(42));
        assert_ne!(anonymize(42), anonymize(43));
        assert_eq!(anonymize(42).len(), 16);
        assert!(anonymize(42).chars().all(|c| c.is_ascii_hexdigit()));
    }
}
