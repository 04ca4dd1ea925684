//! Authentication for the control port
//!
//! Covers the credential sent in the AUTHENTICATE handshake and the salted,
//! iterated SHA-1 key derivation (S2K) used for stored password hashes.
//!
//! # Hashed password format
//!
//! ```text
//! 16:<hex of salt (8 bytes) || iteration code (1 byte) || SHA-1 key (20 bytes)>
//! ```

use std::{fmt::Debug, path::Path};

use sha1::{Digest, Sha1};

use crate::{ControlError, Result};

pub const SALT_LEN: usize = 8;
pub const SPECIFIER_LEN: usize = SALT_LEN + 1;
pub const KEY_LEN: usize = 20;

/// Iteration code used for newly generated specifiers (65536 bytes hashed)
pub const DEFAULT_ITERATION_CODE: u8 = 0x60;

const HASH_PREFIX: &str = "16:";
const EXPONENT_BIAS: u32 = 6;

/// What to present in the AUTHENTICATE handshake
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// No authentication configured on the peer
    None,
    Password(String),
    /// Raw contents of the authentication cookie file
    Cookie(Vec<u8>),
}

impl Credential {
    /// Read a cookie file into a credential
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Transport` if the file cannot be read
    pub async fn cookie_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::Cookie(tokio::fs::read(path).await?))
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Cookie(cookie) => write!(f, "Cookie(<{} bytes>)", cookie.len()),
        }
    }
}

/// Number of bytes fed to the hash for an iteration code
#[must_use]
pub const fn iteration_count(code: u8) -> usize {
    (16 + (code as usize & 15)) << ((code as u32 >> 4) + EXPONENT_BIAS)
}

/// Derive the 20-byte key for `secret` under `specifier` (salt followed by
/// the iteration code)
#[must_use]
pub fn derive_key(secret: &[u8], specifier: &[u8; SPECIFIER_LEN]) -> [u8; KEY_LEN] {
    let mut chunk = Vec::with_capacity(SALT_LEN + secret.len());
    chunk.extend_from_slice(&specifier[..SALT_LEN]);
    chunk.extend_from_slice(secret);

    let mut hasher = Sha1::new();
    let mut remaining = iteration_count(specifier[SALT_LEN]);
    while remaining > 0 {
        let take = remaining.min(chunk.len());
        hasher.update(&chunk[..take]);
        remaining -= take;
    }

    hasher.finalize().into()
}

/// Hash `secret` under a fresh random salt, in the `16:<HEX>` form
#[must_use]
pub fn generate_specifier(secret: &[u8]) -> String {
    let salt: [u8; SALT_LEN] = rand::random();
    specifier_with_salt(secret, salt)
}

fn specifier_with_salt(secret: &[u8], salt: [u8; SALT_LEN]) -> String {
    let mut specifier = [0u8; SPECIFIER_LEN];
    specifier[..SALT_LEN].copy_from_slice(&salt);
    specifier[SALT_LEN] = DEFAULT_ITERATION_CODE;

    let key = derive_key(secret, &specifier);
    format!(
        "{HASH_PREFIX}{}{}",
        hex::encode_upper(specifier),
        hex::encode_upper(key)
    )
}

/// Check `secret` against a stored `16:<HEX>` hash
///
/// A stored value with the wrong prefix, invalid hex or the wrong length
/// never verifies.
#[must_use]
pub fn verify(secret: &[u8], stored: &str) -> bool {
    parse_hashed(stored).is_ok_and(|(specifier, expected)| {
        constant_time_eq(&derive_key(secret, &specifier), &expected)
    })
}

/// Parse a stored hash into its specifier and key
///
/// # Errors
///
/// Returns `ControlError::Protocol` if the value is not a `16:<HEX>` hash of
/// the expected length
pub fn parse_hashed(stored: &str) -> Result<([u8; SPECIFIER_LEN], [u8; KEY_LEN])> {
    let encoded = stored
        .trim()
        .strip_prefix(HASH_PREFIX)
        .ok_or_else(|| ControlError::protocol("hashed password must start with 16:"))?;
    let decoded = hex::decode(encoded)
        .map_err(|e| ControlError::protocol(format!("hashed password is not hex: {e}")))?;
    if decoded.len() != SPECIFIER_LEN + KEY_LEN {
        return Err(ControlError::protocol(format!(
            "hashed password has {} bytes, expected {}",
            decoded.len(),
            SPECIFIER_LEN + KEY_LEN
        )));
    }

    let mut specifier = [0u8; SPECIFIER_LEN];
    let mut key = [0u8; KEY_LEN];
    specifier.copy_from_slice(&decoded[..SPECIFIER_LEN]);
    key.copy_from_slice(&decoded[SPECIFIER_LEN..]);
    Ok((specifier, key))
}

/// Compare two byte slices without short-circuiting on the first difference
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
