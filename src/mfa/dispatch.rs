//! One-time-code dispatch.
//!
//! Delivery providers live outside the core: the service only needs a
//! `(destination, code) -> delivery result` seam. The log-only sender backs
//! development and tests.

use anyhow::Result;
use async_trait::async_trait;
use rand::{rngs::OsRng, Rng};
use tracing::info;

/// Number of digits in SMS/email one-time codes.
const CODE_DIGITS: u32 = 6;

/// Outbound sender for SMS/email one-time codes.
#[async_trait]
pub trait CodeSender: Send + Sync {
    /// Deliver a code. Errors mean the challenge cannot proceed.
    async fn send(&self, destination: &str, code: &str) -> Result<()>;
}

/// Sender that logs instead of delivering. Default when no provider is
/// configured.
#[derive(Debug, Default)]
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send(&self, destination: &str, code: &str) -> Result<()> {
        info!("one-time code for {destination}: {code}");
        Ok(())
    }
}

/// 6-digit code from a cryptographically secure source, zero-padded.
#[must_use]
pub fn generate_numeric_code() -> String {
    let bound = 10u32.pow(CODE_DIGITS);
    let value = OsRng.gen_range(0..bound);
    format!("{value:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_numeric_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn log_sender_always_succeeds() {
        let sender = LogCodeSender;
        assert!(sender.send("+15550100", "123456").await.is_ok());
    }
}
