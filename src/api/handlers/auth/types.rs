//! Request and response bodies for the auth surface.

use crate::mfa::MfaMethod;
use crate::token::TokenPair;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Client-declared device class, part of the fingerprint.
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub remember_me: bool,
}

pub(crate) fn default_device_type() -> String {
    "unknown".to_string()
}

/// Login outcome: granted, challenged, or blocked.
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Granted(GrantedBody),
    MfaRequired(ChallengeBody),
    Blocked,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrantedBody {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChallengeBody {
    /// Handle for completing the login via the MFA endpoints.
    pub pending_id: Uuid,
    pub method: MfaMethod,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateResponse {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub scope: Vec<String>,
    pub mfa_verified: bool,
    pub risk_score: u8,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogoutRequest {
    /// A session id, or `"all"` to end every session for the user.
    pub session: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub revoked_sessions: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaSetupRequest {
    pub method: MfaMethod,
    /// Phone number or email address for code-based methods.
    pub destination: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MfaSetupResponse {
    pub config_id: Uuid,
    pub method: MfaMethod,
    pub secret_base32: Option<String>,
    pub otpauth_url: Option<String>,
    pub qr_data_url: Option<String>,
    /// Shown exactly once.
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaVerifySetupRequest {
    pub config_id: Uuid,
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaChallengeRequest {
    pub pending_id: Uuid,
    pub method: Option<MfaMethod>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaVerifyRequest {
    pub pending_id: Uuid,
    pub code: String,
    pub config_id: Option<Uuid>,
    #[serde(default)]
    pub is_backup: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MfaVerifyResponse {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub tokens: TokenPair,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_backup_codes: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}
