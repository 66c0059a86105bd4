//! Error taxonomy for the authentication core.
//!
//! Security-relevant failures are values, never panics: handlers translate the
//! taxonomy to HTTP statuses, and callers can tell "expired" apart from "likely
//! hijacked" without string matching.

use axum::http::StatusCode;

/// Security alerts that must be surfaced distinctly from generic failures so
/// callers can force re-authentication or lock an account.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SecurityAlert {
    /// Request IP does not match the IP bound to the session.
    #[error("session ip mismatch")]
    IpMismatch,
    /// Device fingerprint does not match the one bound to the session.
    #[error("device fingerprint mismatch")]
    FingerprintMismatch,
    /// Access count exceeded the configured threshold in a short window.
    #[error("session access anomaly")]
    AccessAnomaly,
    /// A retired refresh credential from a known family was presented again.
    #[error("refresh token reuse detected")]
    TokenReuse,
    /// Adaptive rate limit exceeded.
    #[error("rate limit exceeded")]
    RateLimited,
    /// The session or its token lineage was explicitly revoked.
    #[error("session revoked")]
    SessionRevoked,
}

impl SecurityAlert {
    /// Stable identifier used in audit rows and API bodies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IpMismatch => "ip_mismatch",
            Self::FingerprintMismatch => "fingerprint_mismatch",
            Self::AccessAnomaly => "access_anomaly",
            Self::TokenReuse => "token_reuse",
            Self::RateLimited => "rate_limited",
            Self::SessionRevoked => "session_revoked",
        }
    }
}

/// Public error type for every service in the core.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed input. Never recorded as a security event.
    #[error("validation: {0}")]
    Validation(String),

    /// Wrong credential or code. Recorded as a verification attempt and fed to
    /// the risk engine, but not fatal.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The credential or session ran out its natural lifetime.
    #[error("expired")]
    Expired,

    /// Hijack/abuse signal. Always logged to the risk event audit trail.
    #[error(transparent)]
    Security(#[from] SecurityAlert),

    /// A store or provider timed out or is unreachable. Degrades per the
    /// fail-open/fail-closed rules of the calling site.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Bad secrets or algorithm configuration. Fatal at startup.
    #[error("configuration: {0}")]
    Configuration(String),
}

impl AuthError {
    /// HTTP status for handler responses.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) | Self::Expired => StatusCode::UNAUTHORIZED,
            Self::Security(SecurityAlert::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            Self::Security(_) => StatusCode::FORBIDDEN,
            Self::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AuthError {
    /// Stable machine-readable code for API bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::Expired => "expired",
            Self::Security(alert) => alert.as_str(),
            Self::DependencyUnavailable(_) => "dependency_unavailable",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl axum::response::IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let body = axum::Json(serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (self.status(), body).into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::DependencyUnavailable(format!("database: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthError, SecurityAlert};
    use axum::http::StatusCode;

    #[test]
    fn alert_identifiers_are_stable() {
        assert_eq!(SecurityAlert::IpMismatch.as_str(), "ip_mismatch");
        assert_eq!(SecurityAlert::TokenReuse.as_str(), "token_reuse");
        assert_eq!(SecurityAlert::RateLimited.as_str(), "rate_limited");
    }

    #[test]
    fn statuses_distinguish_expiry_from_hijack() {
        assert_eq!(AuthError::Expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Security(SecurityAlert::IpMismatch).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::Security(SecurityAlert::RateLimited).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::DependencyUnavailable("redis".to_string()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn database_errors_map_to_dependency_unavailable() {
        let err: AuthError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AuthError::DependencyUnavailable(_)));
    }
}
