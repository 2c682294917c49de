//! Cryptographic utilities for cache keys and download tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes in a download token (256 bits).
pub const DOWNLOAD_TOKEN_BYTES: usize = 32;

/// Prefix carried by every download token.
pub const DOWNLOAD_TOKEN_PREFIX: &str = "dl_";

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates an unguessable download token.
///
/// The token is `dl_` followed by URL-safe base64 of 32 bytes from the OS RNG.
/// Only its hash should ever be persisted.
pub fn generate_download_token() -> String {
    let mut bytes = [0u8; DOWNLOAD_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{}{}", DOWNLOAD_TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Checks the shape of a presented download token before any lookup.
pub fn is_well_formed_download_token(token: &str) -> bool {
    match token.strip_prefix(DOWNLOAD_TOKEN_PREFIX) {
        Some(body) => URL_SAFE_NO_PAD
            .decode(body)
            .map(|raw| raw.len() == DOWNLOAD_TOKEN_BYTES)
            .unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex("test");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_sha256_hex_empty_string() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_hex_different_inputs() {
        assert_ne!(sha256_hex("input1"), sha256_hex("input2"));
    }

    #[test]
    fn test_generate_download_token_shape() {
        let token = generate_download_token();
        assert!(token.starts_with(DOWNLOAD_TOKEN_PREFIX));
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(token.len(), DOWNLOAD_TOKEN_PREFIX.len() + 43);
        assert!(is_well_formed_download_token(&token));
    }

    #[test]
    fn test_generate_download_token_unique() {
        let a = generate_download_token();
        let b = generate_download_token();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(!is_well_formed_download_token(""));
        assert!(!is_well_formed_download_token("dl_"));
        assert!(!is_well_formed_download_token("dl_short"));
        assert!(!is_well_formed_download_token("xx_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"));
        assert!(!is_well_formed_download_token("../../etc/passwd"));
    }
}
