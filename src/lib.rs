//! # Custodia (Authentication & Session-Security Core)
//!
//! `custodia` is the authentication core for a financial-services backend:
//! token issuance with rotation and family-wide reuse revocation, device-bound
//! sessions with a concurrent-session cap, multi-factor verification (TOTP,
//! SMS/email codes, backup codes), and a multi-signal risk engine that turns
//! every login, refresh, and MFA attempt into an allow / challenge / block
//! decision.
//!
//! ## Failure policy
//!
//! Read paths that only widen exposure when unavailable (revocation lookups,
//! risk signals) fail open with a logged warning. Paths whose unavailability
//! would otherwise mean "unlimited attempts" (refresh rotation, rate gates)
//! fail closed.
//!
//! ## Typed denials
//!
//! "Expired" and "likely hijacked" never share an error variant: hijack
//! signals ([`error::SecurityAlert`]) carry their own type so callers can
//! force re-authentication, revoke a token family, or lock an account.

pub mod api;
pub mod cli;
pub mod crypto;
pub mod error;
pub mod mfa;
pub mod risk;
pub mod session;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
