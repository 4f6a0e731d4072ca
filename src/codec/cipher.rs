//! # AES-128-CBC Encryption
//!
//! The sealed form is `base64(IV || ciphertext)`. Padding is PKCS#7 and is
//! always applied, so block-aligned input grows by one full block.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;

use super::encoding::{base64_decode, base64_encode};
use crate::error::{Result, UplinkError};

/// AES block size (and IV length) in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// AES-128 key length in bytes
pub const AES_KEY_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Encrypt `plaintext` under `key` with a fresh random IV
///
/// # Returns
///
/// * `Result<String>` - base64 of `IV || ciphertext`
///
/// # Errors
///
/// Returns [`UplinkError::Crypto`] if `key` is not 16 bytes
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String> {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);

    let sealed = encrypt_with_iv(plaintext, key, &iv)?;
    Ok(base64_encode(&sealed))
}

/// Encrypt with a caller-supplied IV
///
/// # Returns
///
/// * `Result<Vec<u8>>` - `IV || ciphertext`, ciphertext length a multiple of 16
pub fn encrypt_with_iv(plaintext: &[u8], key: &[u8], iv: &[u8; AES_BLOCK_SIZE]) -> Result<Vec<u8>> {
    let cipher = Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|_| UplinkError::Crypto(format!("AES-128 key must be {} bytes, got {}", AES_KEY_SIZE, key.len())))?;

    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut sealed = Vec::with_capacity(AES_BLOCK_SIZE + ciphertext.len());
    sealed.extend_from_slice(iv);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Reverse [`encrypt`]: strip the IV, decrypt and remove the padding
///
/// # Errors
///
/// Returns [`UplinkError::Crypto`] if the text is not base64, is shorter than
/// one IV plus one block, is not block aligned, or the padding is invalid
pub fn decrypt(sealed: &str, key: &[u8]) -> Result<Vec<u8>> {
    let raw = base64_decode(sealed)?;

    if raw.len() < 2 * AES_BLOCK_SIZE || raw.len() % AES_BLOCK_SIZE != 0 {
        return Err(UplinkError::Crypto(format!(
            "Sealed payload has invalid length: {} bytes",
            raw.len()
        )));
    }

    let (iv, ciphertext) = raw.split_at(AES_BLOCK_SIZE);
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|_| UplinkError::Crypto(format!("AES-128 key must be {} bytes, got {}", AES_KEY_SIZE, key.len())))?;

    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| UplinkError::Crypto("Invalid PKCS#7 padding".to_string()))
}
