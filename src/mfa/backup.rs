//! Single-use backup codes.
//!
//! Ten codes per batch, drawn from an alphabet without lookalike characters
//! and displayed in groups of four. Only SHA-256 digests are stored, and
//! verification compares digests in constant time. Regenerating a batch
//! invalidates every prior code.

use crate::crypto::sha256_hex;
use crate::error::AuthError;
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated batch: plaintext for one-time display, digests for
/// storage.
#[derive(Debug)]
pub struct BackupCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

impl BackupCodeBatch {
    #[must_use]
    pub fn generate() -> Self {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let code = generate_code();
            code_hashes.push(hash_backup_code(&code));
            codes.push(code);
        }
        Self { codes, code_hashes }
    }
}

/// Strip separators and case from user input.
///
/// # Errors
/// Returns a validation error when the result is not a well-formed code.
pub fn normalize_backup_code(input: &str) -> Result<String, AuthError> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN
        || !normalized
            .as_bytes()
            .iter()
            .all(|ch| BACKUP_CODE_ALPHABET.contains(ch))
    {
        return Err(AuthError::Validation("malformed backup code".to_string()));
    }
    Ok(normalized)
}

/// Digest of a normalized code, the stored representation.
#[must_use]
pub fn hash_backup_code(code: &str) -> String {
    let normalized: String = code.chars().filter(char::is_ascii_alphanumeric).collect();
    sha256_hex(normalized.to_ascii_uppercase().as_bytes())
}

/// Constant-time comparison of a presented code against a stored digest.
#[must_use]
pub fn verify_backup_code(normalized: &str, stored_hash: &str) -> bool {
    let presented = sha256_hex(normalized.as_bytes());
    presented.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

fn generate_code() -> String {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    OsRng.fill_bytes(&mut raw);

    let mut out = String::with_capacity(BACKUP_CODE_LEN + 2);
    for (idx, byte) in raw.iter().enumerate() {
        if idx > 0 && idx % BACKUP_CODE_GROUP_SIZE == 0 {
            out.push('-');
        }
        let position = usize::from(*byte) % BACKUP_CODE_ALPHABET.len();
        if let Some(&ch) = BACKUP_CODE_ALPHABET.get(position) {
            out.push(ch as char);
        }
    }
    out
}
