//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::secrets::{
    ARG_ACCESS_SECRET, ARG_ENCRYPTION_SECRET, ARG_REFRESH_SECRET,
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let redis_url = matches
        .get_one::<String>("redis-url")
        .cloned()
        .context("missing required argument: --redis-url")?;
    let issuer = matches
        .get_one::<String>("issuer")
        .cloned()
        .unwrap_or_else(|| "custodia".to_string());
    let audience = matches
        .get_one::<String>("audience")
        .cloned()
        .unwrap_or_else(|| "api".to_string());

    let secret = |name: &str| -> Result<SecretString> {
        matches
            .get_one::<String>(name)
            .cloned()
            .map(SecretString::from)
            .with_context(|| format!("missing required argument: --{name}"))
    };

    Ok(Action::Server(Args {
        port,
        dsn,
        redis_url,
        issuer,
        audience,
        access_secret: secret(ARG_ACCESS_SECRET)?,
        refresh_secret: secret(ARG_REFRESH_SECRET)?,
        encryption_secret: secret(ARG_ENCRYPTION_SECRET)?,
        geo_url: matches.get_one::<String>("geo-url").cloned(),
        max_sessions: matches.get_one::<usize>("max-sessions").copied().unwrap_or(5),
        session_ttl_seconds: matches
            .get_one::<u64>("session-ttl-seconds")
            .copied()
            .unwrap_or(86_400),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::Action;

    #[test]
    fn server_action_from_args() -> Result<()> {
        temp_env::with_vars([("CUSTODIA_GEO_URL", None::<&str>)], || {
            let command = crate::cli::commands::new();
            let matches = command.get_matches_from(vec![
                "custodia",
                "--port",
                "9000",
                "--dsn",
                "postgres://user@localhost:5432/custodia",
                "--access-secret",
                "access-secret-access-secret-0123",
                "--refresh-secret",
                "refresh-secret-refresh-secret-01",
                "--encryption-secret",
                "encryption-secret-encryption-001",
            ]);

            let Action::Server(args) = handler(&matches)?;
            assert_eq!(args.port, 9000);
            assert_eq!(args.redis_url, "redis://127.0.0.1:6379");
            assert_eq!(args.issuer, "custodia");
            assert_eq!(args.max_sessions, 5);
            assert!(args.geo_url.is_none());
            Ok(())
        })
    }
}
