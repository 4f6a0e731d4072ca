//! # Secure Envelope
//!
//! Seals a plain batch body for the `aes128cbc` transport.
//!
//! ```text
//! Authorization: {username}:{hex(hmac_sha256(batch, key))}
//! body:          base64(IV || AES-128-CBC(batch))
//! response:      starts with base64(sha256(batch))
//! ```

use crate::codec::{base64_encode, encrypt, hex_encode, hmac_sha256, sha256, AES_KEY_SIZE};
use crate::error::Result;

/// One sealed attempt at sending a batch
///
/// The IV is fresh on every seal; the credential and marker depend only on
/// the plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureEnvelope {
    pub expected_marker: String,
    pub authorization: String,
    pub body: String,
}

impl SecureEnvelope {
    /// Seal `plaintext` for `username` under `key`
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::UplinkError::Crypto`] if the cipher or MAC
    /// cannot be keyed
    pub fn seal(plaintext: &str, username: &str, key: &[u8; AES_KEY_SIZE]) -> Result<Self> {
        let data = plaintext.as_bytes();
        let mac = hmac_sha256(data, key)?;

        Ok(Self {
            expected_marker: base64_encode(&sha256(data)),
            authorization: format!("{}:{}", username, hex_encode(&mac)),
            body: encrypt(data, key)?,
        })
    }

    /// Whether a response body acknowledges this envelope
    pub fn acknowledged_by(&self, response: &[u8]) -> bool {
        response.starts_with(self.expected_marker.as_bytes())
    }
}
