//! Refresh-token rotation.

use super::state::AuthState;
use super::types::{GrantedBody, RefreshRequest};
use crate::api::handlers::{client_ip, request_context};
use crate::error::{AuthError, SecurityAlert};
use crate::risk::{EventContext, RiskEventKind};
use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::response::Json;
use std::sync::Arc;
use tracing::warn;

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New credential pair", body = GrantedBody),
        (status = 401, description = "Invalid or expired refresh credential"),
        (status = 403, description = "Reuse detected; token family revoked"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "auth",
)]
/// Rotate a refresh credential for a fresh pair. Reuse of a retired
/// credential revokes its whole family and is recorded as a high-risk event.
pub async fn refresh(
    state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<GrantedBody>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("missing payload".to_string()));
    };

    let ip = client_ip(&headers);
    state.risk.rate_gate("refresh", &ip).await?;

    let context = request_context(&headers, &request.device_type);
    let rotated = state.tokens.refresh_pair(&request.refresh_token).await;
    let (pair, claims) = match rotated {
        Ok(outcome) => outcome,
        Err(AuthError::Security(SecurityAlert::TokenReuse)) => {
            warn!("refresh reuse detected from {ip}");
            state
                .risk
                .record_alert(
                    RiskEventKind::Refresh,
                    &EventContext {
                        user_id: None,
                        ip,
                        user_agent: context.user_agent.clone(),
                        fingerprint: Some(context.fingerprint()),
                        user_locked: false,
                    },
                    SecurityAlert::TokenReuse,
                )
                .await;
            return Err(SecurityAlert::TokenReuse.into());
        }
        Err(e) => return Err(e),
    };

    // The session must still match the presenting device. A hijack-typed
    // denial here goes to the audit trail before it is returned.
    if let Err(e) = state.sessions.validate_session(claims.sid, &context).await {
        if let AuthError::Security(alert) = &e {
            state
                .risk
                .record_alert(
                    RiskEventKind::Session,
                    &EventContext {
                        user_id: Some(claims.sub),
                        ip,
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

    Ok(Json(GrantedBody {
        session_id: claims.sid,
        tokens: pair,
    }))
}
