//! MFA enrollment, challenge, and login completion.

use super::state::AuthState;
use super::types::{
    BackupCodesResponse, ChallengeBody, MfaChallengeRequest, MfaSetupRequest, MfaSetupResponse,
    MfaVerifyRequest, MfaVerifyResponse, MfaVerifySetupRequest,
};
use super::validate::ValidateParams;
use crate::api::handlers::{bearer_token, request_context};
use crate::error::AuthError;
use crate::mfa::MfaContext;
use crate::session::RequestContext;
use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

fn mfa_context(context: &RequestContext) -> MfaContext {
    MfaContext {
        ip: context.ip.clone(),
        user_agent: context.user_agent.clone(),
        fingerprint: Some(context.fingerprint()),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/setup",
    request_body = MfaSetupRequest,
    responses(
        (status = 200, description = "Factor enrollment started", body = MfaSetupResponse),
        (status = 400, description = "Missing destination for a code-based method"),
        (status = 401, description = "Invalid credential"),
    ),
    tag = "auth",
)]
/// Begin enrolling a factor for the authenticated user. The enrollment
/// material and the backup codes in the response are shown exactly once.
pub async fn setup(
    state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<MfaSetupRequest>>,
) -> Result<Json<MfaSetupResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("missing payload".to_string()));
    };

    let token = bearer_token(&headers)?;
    let claims = state.tokens.validate_access(token).await?;

    let setup = state
        .mfa
        .setup_factor(
            claims.sub,
            request.method,
            request.destination.as_deref(),
            &claims.sub.to_string(),
        )
        .await?;

    let (secret_base32, otpauth_url, qr_data_url) = match setup.totp {
        Some(enrollment) => (
            Some(enrollment.secret_base32),
            Some(enrollment.otpauth_url),
            Some(enrollment.qr_data_url),
        ),
        None => (None, None, None),
    };

    Ok(Json(MfaSetupResponse {
        config_id: setup.config_id,
        method: setup.method,
        secret_base32,
        otpauth_url,
        qr_data_url,
        backup_codes: setup.backup_codes,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify-setup",
    request_body = MfaVerifySetupRequest,
    responses(
        (status = 204, description = "Factor enabled"),
        (status = 401, description = "Invalid credential or wrong code"),
    ),
    tag = "auth",
)]
/// Confirm an enrollment with its first code, enabling the factor.
pub async fn verify_setup(
    state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<MfaVerifySetupRequest>>,
) -> Result<StatusCode, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("missing payload".to_string()));
    };

    let token = bearer_token(&headers)?;
    let claims = state.tokens.validate_access(token).await?;

    let context = request_context(&headers, "unknown");
    state
        .mfa
        .verify_setup(request.config_id, &request.code, &mfa_context(&context))
        .await?;
    info!("mfa factor enabled for {}", claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/challenge",
    request_body = MfaChallengeRequest,
    responses(
        (status = 200, description = "Challenge issued, code dispatched where applicable", body = ChallengeBody),
        (status = 401, description = "Unknown or expired pending login"),
    ),
    tag = "auth",
)]
/// Re-issue the challenge for a parked login, for example to resend an SMS
/// code or switch to a different enrolled method.
pub async fn challenge(
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaChallengeRequest>>,
) -> Result<Json<ChallengeBody>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("missing payload".to_string()));
    };

    let pending = state.pending_login(request.pending_id).await?;
    let challenge = state.mfa.challenge(pending.user_id, request.method).await?;

    Ok(Json(ChallengeBody {
        pending_id: request.pending_id,
        method: challenge.method,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Login completed", body = MfaVerifyResponse),
        (status = 401, description = "Wrong code or expired pending login"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "auth",
)]
/// Answer a challenge and complete the parked login. The resulting session is
/// marked MFA-verified before any credential is issued.
pub async fn verify(
    state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<MfaVerifyRequest>>,
) -> Result<Json<MfaVerifyResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("missing payload".to_string()));
    };

    let pending = state.pending_login(request.pending_id).await?;
    // The session binds to the device completing the challenge.
    let context = request_context(&headers, &pending.device_type);

    let outcome = state
        .mfa
        .verify_code(
            pending.user_id,
            &request.code,
            request.config_id,
            request.is_backup,
            &mfa_context(&context),
        )
        .await?;

    state.users.clear_lockout(pending.user_id).await?;

    let permissions = state
        .users
        .find_by_email(&pending.email)
        .await?
        .map(|user| user.permissions)
        .unwrap_or_default();

    let (session, evicted) = state
        .sessions
        .create_session(pending.user_id, &context, permissions.clone(), pending.risk_score)
        .await?;
    for session_id in evicted {
        state.tokens.revoke_session(session_id).await?;
    }
    state.sessions.mark_mfa_verified(session.session_id).await?;

    let tokens = state.tokens.issue_pair(
        pending.user_id,
        session.session_id,
        Uuid::new_v4(),
        permissions,
        pending.remember_me,
    )?;

    state.finish_login(request.pending_id).await;
    info!("mfa login completed for {}", pending.user_id);

    Ok(Json(MfaVerifyResponse {
        session_id: session.session_id,
        tokens,
        remaining_backup_codes: outcome.remaining_backup_codes,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/backup-codes/regenerate",
    params(ValidateParams),
    responses(
        (status = 200, description = "Fresh batch; all prior codes invalidated", body = BackupCodesResponse),
        (status = 401, description = "Invalid credential"),
        (status = 403, description = "Session is not MFA-verified"),
    ),
    tag = "auth",
)]
/// Replace the caller's backup codes. Requires an MFA-verified session, since
/// the new batch is itself a second factor.
pub async fn regenerate_backup_codes(
    state: Extension<Arc<AuthState>>,
    params: Query<ValidateParams>,
    headers: HeaderMap,
) -> Result<Json<BackupCodesResponse>, AuthError> {
    let token = bearer_token(&headers)?;
    let claims = state.tokens.validate_access(token).await?;

    let context = request_context(&headers, &params.device_type);
    let session = state.sessions.validate_session(claims.sid, &context).await?;
    if !session.mfa_verified {
        return Err(AuthError::AuthenticationFailed(
            "backup code regeneration requires an mfa-verified session".to_string(),
        ));
    }

    let codes = state.mfa.regenerate_backup_codes(claims.sub).await?;
    Ok(Json(BackupCodesResponse { backup_codes: codes }))
}
