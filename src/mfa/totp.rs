//! TOTP factor: SHA-1, 6 digits, 30-second step, ±1 step window.

use crate::error::AuthError;
use totp_rs::{Algorithm, Secret, TOTP};

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Generate a fresh shared secret.
///
/// # Errors
/// Returns an error if the generated secret cannot be expanded to bytes.
pub fn generate_secret() -> Result<Vec<u8>, AuthError> {
    Secret::generate_secret()
        .to_bytes()
        .map_err(|e| AuthError::Configuration(format!("totp secret: {e:?}")))
}

fn build(secret: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP, AuthError> {
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP,
        secret,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| AuthError::Configuration(format!("totp init: {e}")))
}

/// Enrollment material shown to the user exactly once.
#[derive(Clone, Debug)]
pub struct TotpEnrollment {
    pub secret_base32: String,
    pub otpauth_url: String,
    pub qr_data_url: String,
}

/// Build the base32 secret, otpauth URL, and QR data URL for enrollment.
///
/// # Errors
/// Returns an error if TOTP or QR construction fails.
pub fn enrollment(secret: &[u8], issuer: &str, account: &str) -> Result<TotpEnrollment, AuthError> {
    let totp = build(secret.to_vec(), issuer, account)?;
    let qr = totp
        .get_qr_base64()
        .map_err(|e| AuthError::Configuration(format!("totp qr: {e}")))?;
    Ok(TotpEnrollment {
        secret_base32: totp.get_secret_base32(),
        otpauth_url: totp.get_url(),
        qr_data_url: format!("data:image/png;base64,{qr}"),
    })
}

/// Check a code against the current step, allowing one step of clock skew.
///
/// # Errors
/// Returns an error if the TOTP context cannot be built from the stored
/// secret.
pub fn verify(secret: &[u8], issuer: &str, code: &str) -> Result<bool, AuthError> {
    let totp = build(secret.to_vec(), issuer, "user")?;
    Ok(totp.check_current(code).unwrap_or(false))
}
