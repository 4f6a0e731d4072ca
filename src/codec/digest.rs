//! # SHA-256 and HMAC-SHA256
//!
//! Full 32-byte outputs, no truncation.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Result, UplinkError};

/// SHA-256 output length in bytes
pub const DIGEST_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Compute the SHA-256 digest of `data`
pub fn sha256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Compute HMAC-SHA256 of `data` under `key`
///
/// # Errors
///
/// Returns [`UplinkError::Crypto`] if the MAC rejects the key length
pub fn hmac_sha256(data: &[u8], key: &[u8]) -> Result<[u8; DIGEST_SIZE]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| UplinkError::Crypto(format!("Invalid HMAC key: {}", e)))?;
    mac.update(data);

    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
