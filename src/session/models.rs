//! Session state and device fingerprinting.

use crate::crypto::sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle. A session leaves `Active` exactly once.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Revoked,
    Expired,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

/// A live session, sealed into the cache store and indexed in the database.
///
/// The fingerprint, IP, and risk fields are read back and compared on every
/// validation call; mismatches surface as typed alerts, not generic failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
    pub mfa_verified: bool,
    /// Risk score at creation time, 0 to 100.
    pub risk_score: u8,
    pub permissions: Vec<String>,
    pub status: SessionStatus,
}

impl Session {
    #[must_use]
    pub fn new(
        user_id: Uuid,
        ip_address: String,
        fingerprint: String,
        permissions: Vec<String>,
        risk_score: u8,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            device_fingerprint: fingerprint,
            ip_address,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            mfa_verified: false,
            risk_score,
            permissions,
            status: SessionStatus::Active,
        }
    }
}

/// Stable device fingerprint over the request identity triple.
///
/// The same client presenting the same IP, user-agent, and declared device
/// type always derives the same value, so a stored fingerprint can be compared
/// on later requests without keeping the raw inputs around.
#[must_use]
pub fn device_fingerprint(ip: &str, user_agent: &str, device_type: &str) -> String {
    sha256_hex(format!("{ip}|{user_agent}|{device_type}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::{device_fingerprint, Session, SessionStatus};
    use uuid::Uuid;

    #[test]
    fn fingerprint_is_stable_and_input_sensitive() {
        let a = device_fingerprint("203.0.113.7", "Mozilla/5.0", "desktop");
        let b = device_fingerprint("203.0.113.7", "Mozilla/5.0", "desktop");
        let c = device_fingerprint("203.0.113.7", "Mozilla/5.0", "mobile");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn new_sessions_start_active_and_unverified() {
        let session = Session::new(
            Uuid::new_v4(),
            "203.0.113.7".to_string(),
            device_fingerprint("203.0.113.7", "Mozilla/5.0", "desktop"),
            vec!["accounts:read".to_string()],
            10,
        );
        assert_eq!(session.status, SessionStatus::Active);
        assert!(!session.mfa_verified);
        assert_eq!(session.access_count, 0);
    }

    #[test]
    fn status_identifiers_are_stable() {
        assert_eq!(SessionStatus::Active.as_str(), "active");
        assert_eq!(SessionStatus::Revoked.as_str(), "revoked");
        assert_eq!(SessionStatus::Expired.as_str(), "expired");
    }
}
