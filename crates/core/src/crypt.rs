// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payload encryption.
//!
//! Job payloads travel base64-wrapped on the wire; when encryption is
//! enabled the text is AES-256-ECB encrypted (zero-padded blocks) before
//! the base64 step. The key is shared, static, and derived once at startup.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::job::PayloadError;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

const BLOCK_LEN: usize = 16;

/// Derive the fixed-size key from the configured key material:
/// UTF-8 bytes, zero-padded or truncated to exactly [`KEY_LEN`] bytes.
pub fn derive_key(material: &str) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    for (dst, src) in key.iter_mut().zip(material.as_bytes()) {
        *dst = *src;
    }
    key
}

/// Payload cipher: AES-256-ECB + base64, or plain base64 when encryption
/// is disabled.
#[derive(Clone)]
pub struct Cipher {
    aes: Option<Aes256>,
}

impl Cipher {
    /// Build a cipher from the derived key. `enabled = false` yields a
    /// base64-only codec.
    pub fn new(key: &[u8; KEY_LEN], enabled: bool) -> Self {
        let aes = enabled.then(|| Aes256::new(GenericArray::from_slice(key)));
        Self { aes }
    }

    /// Codec that only applies the base64 wrapping.
    pub fn disabled() -> Self {
        Self { aes: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.aes.is_some()
    }

    /// Encrypt raw bytes, zero-padding to the block size. Identity when
    /// encryption is disabled.
    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        let Some(aes) = &self.aes else {
            return plain.to_vec();
        };
        let blocks = plain.len().div_ceil(BLOCK_LEN).max(1);
        let mut out = vec![0u8; blocks * BLOCK_LEN];
        out[..plain.len()].copy_from_slice(plain);
        for chunk in out.chunks_exact_mut(BLOCK_LEN) {
            aes.encrypt_block(GenericArray::from_mut_slice(chunk));
        }
        out
    }

    /// Decrypt raw bytes. Fails when the input is not block-aligned.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, PayloadError> {
        let Some(aes) = &self.aes else {
            return Ok(data.to_vec());
        };
        if data.is_empty() || data.len() % BLOCK_LEN != 0 {
            return Err(PayloadError::BadCiphertext(data.len()));
        }
        let mut out = data.to_vec();
        for chunk in out.chunks_exact_mut(BLOCK_LEN) {
            aes.decrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(out)
    }

    /// Encode a payload for the wire: encrypt (when enabled), then base64.
    pub fn encode(&self, plain: &str) -> Vec<u8> {
        BASE64.encode(self.encrypt(plain.as_bytes())).into_bytes()
    }

    /// Decode a wire payload: base64, decrypt (when enabled), UTF-8,
    /// trailing zero padding stripped.
    pub fn decode(&self, wire: &[u8]) -> Result<String, PayloadError> {
        let trimmed: Vec<u8> = wire
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let raw = BASE64
            .decode(&trimmed)
            .map_err(|e| PayloadError::Base64(e.to_string()))?;
        let mut plain = self.decrypt(&raw)?;
        while plain.last() == Some(&0) {
            plain.pop();
        }
        String::from_utf8(plain).map_err(|_| PayloadError::NotUtf8)
    }
}

#[cfg(test)]
#[path = "crypt_tests.rs"]
mod tests;
