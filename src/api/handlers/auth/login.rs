//! Password login with risk-based step-up.

use super::state::{AuthState, PendingLogin};
use super::types::{ChallengeBody, GrantedBody, LoginRequest, LoginResponse};
use super::users::verify_password;
use crate::api::handlers::{client_ip, request_context, valid_email};
use crate::error::AuthError;
use crate::risk::{EventContext, RiskEventKind};
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login granted or MFA challenge issued", body = LoginResponse),
        (status = 400, description = "Malformed credentials"),
        (status = 401, description = "Unknown user, wrong password, or locked account"),
        (status = 403, description = "Blocked by risk policy"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "auth",
)]
/// Authenticate a password, score the attempt, and answer with tokens, an MFA
/// challenge, or a block.
pub async fn login(
    state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("missing payload".to_string()));
    };
    if !valid_email(&request.email) {
        return Err(AuthError::Validation("invalid email".to_string()));
    }

    let ip = client_ip(&headers);
    state
        .risk
        .rate_gate(&format!("login:{}", request.email), &ip)
        .await?;

    let context = request_context(&headers, &request.device_type);
    let fingerprint = context.fingerprint();

    let Some(user) = state.users.find_by_email(&request.email).await? else {
        // Unknown accounts still feed the enumeration detectors.
        state
            .risk
            .record_failure(&EventContext {
                user_id: None,
                ip: ip.clone(),
                user_agent: context.user_agent.clone(),
                fingerprint: Some(fingerprint),
                user_locked: false,
            })
            .await;
        return Err(AuthError::AuthenticationFailed(
            "invalid credentials".to_string(),
        ));
    };

    let event = EventContext {
        user_id: Some(user.user_id),
        ip: ip.clone(),
        user_agent: context.user_agent.clone(),
        fingerprint: Some(fingerprint),
        user_locked: user.is_locked(Utc::now()),
    };

    if user.is_locked(Utc::now()) {
        state.risk.record_failure(&event).await;
        warn!("login attempt against locked account {}", user.user_id);
        return Err(AuthError::AuthenticationFailed(
            "account is temporarily locked".to_string(),
        ));
    }

    if !verify_password(&user.password_hash, &request.password) {
        state.users.record_login_failure(user.user_id).await?;
        state.risk.record_failure(&event).await;
        return Err(AuthError::AuthenticationFailed(
            "invalid credentials".to_string(),
        ));
    }

    let assessment = state.risk.assess(RiskEventKind::Login, &event).await;
    if assessment.blocked {
        warn!(
            score = assessment.score,
            "login blocked for {}", user.user_id
        );
        return Ok((StatusCode::FORBIDDEN, Json(LoginResponse::Blocked)));
    }

    // An enrolled factor is always challenged; risk only decides the fate of
    // factorless accounts.
    match state.mfa.challenge(user.user_id, None).await {
        Ok(challenge) => {
            let pending_id = state
                .park_login(&PendingLogin {
                    user_id: user.user_id,
                    email: user.email.clone(),
                    ip,
                    user_agent: context.user_agent.clone(),
                    device_type: request.device_type.clone(),
                    remember_me: request.remember_me,
                    risk_score: assessment.score,
                })
                .await?;
            return Ok((
                StatusCode::OK,
                Json(LoginResponse::MfaRequired(ChallengeBody {
                    pending_id,
                    method: challenge.method,
                })),
            ));
        }
        Err(AuthError::AuthenticationFailed(_)) => {
            if assessment.requires_challenge() {
                // High risk with nothing to challenge: deny rather than admit.
                warn!(
                    score = assessment.score,
                    "factorless high-risk login denied for {}", user.user_id
                );
                return Ok((StatusCode::FORBIDDEN, Json(LoginResponse::Blocked)));
            }
        }
        Err(e) => return Err(e),
    }

    state.users.clear_lockout(user.user_id).await?;
    state.risk.record_success(&event).await;

    let (session, evicted) = state
        .sessions
        .create_session(
            user.user_id,
            &context,
            user.permissions.clone(),
            assessment.score,
        )
        .await?;
    for session_id in evicted {
        state.tokens.revoke_session(session_id).await?;
    }

    let tokens = state.tokens.issue_pair(
        user.user_id,
        session.session_id,
        Uuid::new_v4(),
        user.permissions,
        request.remember_me,
    )?;

    info!("login granted for {}", user.user_id);
    Ok((
        StatusCode::OK,
        Json(LoginResponse::Granted(GrantedBody {
            session_id: session.session_id,
            tokens,
        })),
    ))
}
