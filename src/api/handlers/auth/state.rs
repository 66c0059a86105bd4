//! Shared state for the auth handlers.

use super::users::UserRepo;
use crate::error::AuthError;
use crate::mfa::MfaService;
use crate::risk::RiskEngine;
use crate::session::SessionService;
use crate::store::TtlStore;
use crate::token::TokenService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How long a half-finished login waits for its MFA answer.
const PENDING_LOGIN_TTL: Duration = Duration::from_secs(5 * 60);

/// Every domain service the auth surface calls, injected once at startup.
pub struct AuthState {
    pub tokens: TokenService,
    pub sessions: SessionService,
    pub mfa: MfaService,
    pub risk: RiskEngine,
    pub users: Arc<dyn UserRepo>,
    pub store: Arc<dyn TtlStore>,
}

/// A password-verified login parked until MFA completes.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingLogin {
    pub user_id: Uuid,
    pub email: String,
    pub ip: String,
    pub user_agent: String,
    pub device_type: String,
    pub remember_me: bool,
    pub risk_score: u8,
}

fn pending_key(pending_id: Uuid) -> String {
    format!("pending:{pending_id}")
}

impl AuthState {
    /// Park a verified login and hand back its opaque handle.
    ///
    /// # Errors
    /// Returns a dependency error if the store write fails.
    pub async fn park_login(&self, pending: &PendingLogin) -> Result<Uuid, AuthError> {
        let pending_id = Uuid::new_v4();
        let json = serde_json::to_string(pending)
            .map_err(|e| AuthError::Configuration(format!("pending login encoding: {e}")))?;
        self.store
            .set(&pending_key(pending_id), &json, Some(PENDING_LOGIN_TTL))
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?;
        Ok(pending_id)
    }

    /// Look up a parked login. The record stays until [`AuthState::finish_login`]
    /// so a mistyped code does not force a fresh password round.
    ///
    /// # Errors
    /// Returns `Expired` for an unknown or timed-out handle.
    pub async fn pending_login(&self, pending_id: Uuid) -> Result<PendingLogin, AuthError> {
        let json = self
            .store
            .get(&pending_key(pending_id))
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?
            .ok_or(AuthError::Expired)?;
        serde_json::from_str(&json)
            .map_err(|e| AuthError::Configuration(format!("pending login decoding: {e}")))
    }

    /// Retire a parked login once tokens have been issued.
    pub async fn finish_login(&self, pending_id: Uuid) {
        if let Err(e) = self.store.delete(&pending_key(pending_id)).await {
            tracing::warn!("failed to drop pending login {pending_id}: {e}");
        }
    }
}
