//! Session termination, single or global.

use super::state::AuthState;
use super::types::{LogoutRequest, LogoutResponse};
use crate::api::handlers::bearer_token;
use crate::error::AuthError;
use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::response::Json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Sessions and their credentials revoked", body = LogoutResponse),
        (status = 400, description = "Malformed session selector"),
        (status = 401, description = "Invalid credential"),
    ),
    tag = "auth",
)]
/// End one session or all of the caller's sessions. Credentials scoped to
/// every affected session are revoked for their remaining lifetime.
pub async fn logout(
    state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<LogoutRequest>>,
) -> Result<Json<LogoutResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("missing payload".to_string()));
    };

    let token = bearer_token(&headers)?;
    let claims = state.tokens.validate_access(token).await?;

    let revoked = if request.session == "all" {
        let revoked = state.sessions.revoke_all(claims.sub).await?;
        for session_id in &revoked {
            state.tokens.revoke_session(*session_id).await?;
        }
        // The caller's own session may already be gone from the index.
        state.tokens.revoke_session(claims.sid).await?;
        info!("revoked {} sessions for {}", revoked.len(), claims.sub);
        revoked.len().max(1)
    } else {
        let session_id: Uuid = request
            .session
            .parse()
            .map_err(|_| AuthError::Validation("invalid session id".to_string()))?;
        if session_id != claims.sid {
            return Err(AuthError::Validation(
                "session does not belong to this credential".to_string(),
            ));
        }
        state.sessions.revoke(session_id).await?;
        state.tokens.revoke_session(session_id).await?;
        info!("revoked session {session_id} for {}", claims.sub);
        1
    };

    Ok(Json(LogoutResponse {
        revoked_sessions: revoked,
    }))
}
