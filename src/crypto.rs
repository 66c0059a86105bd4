//! Envelope encryption for data at rest.
//!
//! Session blobs and MFA secrets are sealed with `ChaCha20-Poly1305` before they
//! touch the cache or the database. The AAD binds each ciphertext to the record
//! identity so a blob cannot be replayed under a different key.

use anyhow::Result;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Seals `plaintext` under `key` with the given AAD.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn seal(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Opens `data` (`nonce || ciphertext`) sealed by [`seal`] with the same AAD.
///
/// # Errors
/// Returns an error if the ciphertext is too short, was tampered with, or the
/// AAD does not match.
pub fn open(key: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), payload)
        .map_err(|e| anyhow::anyhow!("decryption failure: {e}"))?;

    Ok(plaintext)
}

/// Derives a 256-bit key from configured secret material.
///
/// Operators hand us an arbitrary-length secret string; the key used by the
/// AEAD is always its SHA-256 digest.
#[must_use]
pub fn derive_key(secret: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(secret);
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// SHA-256 hex digest, used wherever only a lookup hash of a token or code may
/// be stored.
#[must_use]
pub fn sha256_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
