//! Bearer validation with session revalidation.

use super::state::AuthState;
use super::types::ValidateResponse;
use crate::api::handlers::{bearer_token, request_context};
use crate::error::AuthError;
use crate::risk::{EventContext, RiskEventKind};
use axum::extract::{Extension, Query};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ValidateParams {
    /// Client-declared device class, part of the fingerprint.
    #[serde(default = "super::types::default_device_type")]
    pub device_type: String,
}

#[utoipa::path(
    get,
    path = "/v1/auth/validate",
    params(ValidateParams),
    responses(
        (status = 200, description = "Credential and session are valid", body = ValidateResponse),
        (status = 401, description = "Invalid or expired credential"),
        (status = 403, description = "Hijack signal: revoked, reused, or device mismatch"),
    ),
    tag = "auth",
)]
/// Validate an access credential and the session it is scoped to.
///
/// Both checks must pass: a signed, unexpired credential whose session was
/// hijacked or revoked is still denied, with a typed reason.
pub async fn validate(
    state: Extension<Arc<AuthState>>,
    params: Query<ValidateParams>,
    headers: HeaderMap,
) -> Result<Json<ValidateResponse>, AuthError> {
    let token = bearer_token(&headers)?;
    let claims = state.tokens.validate_access(token).await?;

    let context = request_context(&headers, &params.device_type);
    let session = match state.sessions.validate_session(claims.sid, &context).await {
        Ok(session) => session,
        Err(e) => {
            // Hijack signals are audited even though the request is denied.
            if let AuthError::Security(alert) = &e {
                state
                    .risk
                    .record_alert(
                        RiskEventKind::Session,
                        &EventContext {
                            user_id: Some(claims.sub),
                            ip: context.ip.clone(),
                            user_agent: context.user_agent.clone(),
                            fingerprint: Some(context.fingerprint()),
                            user_locked: false,
                        },
                        *alert,
                    )
                    .await;
            }
            return Err(e);
        }
    };

    Ok(Json(ValidateResponse {
        user_id: claims.sub,
        session_id: claims.sid,
        scope: claims.scope,
        mfa_verified: session.mfa_verified,
        risk_score: session.risk_score,
    }))
}
