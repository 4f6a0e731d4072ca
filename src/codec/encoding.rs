//! # Text Encodings
//!
//! Base64 with the URL-safe alphabet (`-` and `_` in place of `+` and `/`),
//! always `=` padded and never line wrapped, plus lowercase hex.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;

use crate::error::{Result, UplinkError};

/// Encode bytes as padded URL-safe base64
///
/// # Examples
///
/// ```
/// use emon_uplink::codec::encoding::base64_encode;
///
/// assert_eq!(base64_encode(b"Man"), "TWFu");
/// assert_eq!(base64_encode(&[0xfb, 0xff]), "-_8=");
/// ```
pub fn base64_encode(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Decode padded URL-safe base64
///
/// # Errors
///
/// Returns [`UplinkError::Crypto`] if the input is not valid URL-safe base64
pub fn base64_decode(text: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(text)
        .map_err(|e| UplinkError::Crypto(format!("Invalid base64 input: {}", e)))
}

/// Encode bytes as lowercase hex, two characters per byte
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
