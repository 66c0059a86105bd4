//! MFA factor configurations and the append-only verification log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported factors. A closed set: the verification state machine handles
/// every variant exhaustively.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Totp,
    Sms,
    Email,
}

impl MfaMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "totp" => Some(Self::Totp),
            "sms" => Some(Self::Sms),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// Per-configuration lifecycle: `PendingSetup` until the first successful
/// verification, then `Enabled` until an explicit disable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigState {
    PendingSetup,
    Enabled,
    Disabled,
}

impl ConfigState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingSetup => "pending_setup",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_setup" => Some(Self::PendingSetup),
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// One stored factor configuration. Secret material is sealed before it
/// reaches the repository.
#[derive(Clone, Debug)]
pub struct ConfigRecord {
    pub config_id: Uuid,
    pub user_id: Uuid,
    pub method: MfaMethod,
    pub state: ConfigState,
    pub is_primary: bool,
    pub sealed_secret: Option<Vec<u8>>,
    pub sealed_destination: Option<Vec<u8>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An unused backup code row.
#[derive(Clone, Debug)]
pub struct BackupCode {
    pub id: Uuid,
    pub code_hash: String,
}

/// Append-only record of one MFA check, the risk engine's primary signal
/// source. Never mutated.
#[derive(Clone, Debug)]
pub struct VerificationAttempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub config_id: Option<Uuid>,
    pub method: &'static str,
    pub code_hash: String,
    pub success: bool,
    pub ip: String,
    pub user_agent: String,
    pub fingerprint: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{ConfigState, MfaMethod};

    #[test]
    fn method_identifiers_round_trip() {
        for method in [MfaMethod::Totp, MfaMethod::Sms, MfaMethod::Email] {
            assert_eq!(MfaMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(MfaMethod::parse("push"), None);
    }

    #[test]
    fn state_identifiers_round_trip() {
        for state in [
            ConfigState::PendingSetup,
            ConfigState::Enabled,
            ConfigState::Disabled,
        ] {
            assert_eq!(ConfigState::parse(state.as_str()), Some(state));
        }
    }
}
