//! # Codec Module
//!
//! Stateless byte transforms used by the secure posting mode.
//!
//! This module handles:
//! - URL-safe base64 and lowercase hex text encodings
//! - SHA-256 digests and HMAC-SHA256 signatures
//! - AES-128-CBC encryption with PKCS#7 padding and a random IV

pub mod encoding;
pub mod digest;
pub mod cipher;

pub use cipher::{decrypt, encrypt, encrypt_with_iv, AES_BLOCK_SIZE, AES_KEY_SIZE};
pub use digest::{hmac_sha256, sha256, DIGEST_SIZE};
pub use encoding::{base64_decode, base64_encode, hex_encode};
