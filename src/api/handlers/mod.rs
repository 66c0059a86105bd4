//! API handlers and shared request utilities.
//!
//! Handlers stay thin: they translate HTTP into domain calls on
//! [`auth::AuthState`](auth::AuthState) and let [`crate::error::AuthError`]
//! render the response.

pub mod auth;
pub mod health;
pub mod root;

use crate::error::AuthError;
use crate::session::RequestContext;
use axum::http::HeaderMap;
use regex::Regex;

/// Lightweight email sanity check used before any repository lookup.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Resolve the client IP, preferring proxy headers over nothing at all.
///
/// The first `x-forwarded-for` hop wins, then `x-real-ip`. Requests with
/// neither are scored and fingerprinted under `"unknown"`, which clusters
/// them together rather than letting them bypass IP signals.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| "unknown".to_string(), |ip| ip.trim().to_string())
}

/// Extract the bearer credential from the `Authorization` header.
///
/// # Errors
/// Returns a validation error when the header is missing or not a bearer.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AuthError::Validation("missing authorization header".to_string()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AuthError::Validation("authorization header is not a bearer".to_string()))
}

/// Build the per-request device identity from headers and the client-declared
/// device class.
#[must_use]
pub fn request_context(headers: &HeaderMap, device_type: &str) -> RequestContext {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    RequestContext {
        ip: client_ip(headers),
        user_agent,
        device_type: device_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{AUTHORIZATION, USER_AGENT};
    use axum::http::HeaderValue;

    #[test]
    fn email_validation() {
        assert!(valid_email("user@example.com"));
        assert!(!valid_email("user@"));
        assert!(!valid_email("user @example.com"));
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers), "198.51.100.2");
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).ok(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn context_uses_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.7"));
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        let context = request_context(&headers, "desktop");
        assert_eq!(context.ip, "203.0.113.7");
        assert_eq!(context.user_agent, "Mozilla/5.0");
        assert_eq!(context.device_type, "desktop");
    }
}
