//! Token hashing and generation helpers.
//!
//! Raw token material never reaches logs, events or blacklist keys. Everything
//! that needs to refer to a token uses [`token_hash`] or, for log lines, the
//! shorter [`token_fingerprint`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of hash characters kept by [`token_fingerprint`].
const FINGERPRINT_LEN: usize = 12;

/// Hash a token into a non-reversible reference.
///
/// SHA-256, URL-safe base64 without padding (43 characters).
///
/// # Examples
///
/// ```
/// use sessionguard_auth::utils::token_hash;
///
/// let hash = token_hash("refresh-token");
/// assert_eq!(hash.len(), 43);
/// assert_eq!(hash, token_hash("refresh-token"));
/// assert_ne!(hash, token_hash("other-token"));
/// ```
#[must_use]
pub fn token_hash(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// Short, log-safe reference to a token (prefix of its hash).
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let mut hash = token_hash(token);
    hash.truncate(FINGERPRINT_LEN);
    hash
}

/// Truncate a secret-bearing value for display, keeping at most `keep`
/// leading characters.
///
/// # Examples
///
/// ```
/// use sessionguard_auth::utils::truncate_secret;
///
/// assert_eq!(truncate_secret("abcdefghijkl", 4), "abcd…");
/// assert_eq!(truncate_secret("abc", 4), "abc");
/// ```
#[must_use]
pub fn truncate_secret(value: &str, keep: usize) -> String {
    if value.chars().count() <= keep {
        return value.to_string();
    }
    let prefix: String = value.chars().take(keep).collect();
    format!("{prefix}…")
}

/// Generate `bytes` bytes of CSPRNG output, URL-safe base64 encoded.
#[must_use]
pub fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a session token.
///
/// 256 bits of randomness, unrelated to any IdP token.
#[must_use]
pub fn generate_session_token() -> String {
    random_urlsafe(32)
}
