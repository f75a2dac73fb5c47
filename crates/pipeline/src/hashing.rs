//! SHA-256 helpers shared by the ledger and the enrichment transform.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of the given bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(sha256_hex(b"/media/in/track.wav"), sha256_hex(b"/media/in/track.wav"));
        assert_ne!(sha256_hex(b"/media/in/a.wav"), sha256_hex(b"/media/in/b.wav"));
    }
}
