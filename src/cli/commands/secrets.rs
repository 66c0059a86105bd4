//! Signing and encryption secret arguments.
//!
//! Secrets are usually injected via environment so they never appear in
//! process listings; the flags exist for local development.

use clap::{Arg, Command};

pub const ARG_ACCESS_SECRET: &str = "access-secret";
pub const ARG_REFRESH_SECRET: &str = "refresh-secret";
pub const ARG_ENCRYPTION_SECRET: &str = "encryption-secret";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_SECRET)
                .long(ARG_ACCESS_SECRET)
                .help("HS256 secret for access tokens (at least 32 bytes)")
                .env("CUSTODIA_ACCESS_SECRET")
                .required(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_SECRET)
                .long(ARG_REFRESH_SECRET)
                .help("HS256 secret for refresh tokens; must differ from the access secret")
                .env("CUSTODIA_REFRESH_SECRET")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ENCRYPTION_SECRET)
                .long(ARG_ENCRYPTION_SECRET)
                .help("Secret for sealing session blobs and MFA material at rest")
                .env("CUSTODIA_ENCRYPTION_SECRET")
                .required(true),
        )
}
