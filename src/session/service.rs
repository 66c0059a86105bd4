//! Session lifecycle: creation under the concurrent-session cap, validation
//! with hijack detection, handle rotation, and revocation.

use super::models::{device_fingerprint, Session, SessionStatus};
use super::store::{SessionBlobs, SessionIndex};
use crate::error::{AuthError, SecurityAlert};
use crate::store::TtlStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_MAX_SESSIONS: usize = 5;
const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_ACTIVITY_THRESHOLD: i64 = 100;
const DEFAULT_ACTIVITY_WINDOW_SECS: u64 = 60;

/// Session policy knobs.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    max_sessions: usize,
    session_ttl: Duration,
    activity_threshold: i64,
    activity_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            activity_threshold: DEFAULT_ACTIVITY_THRESHOLD,
            activity_window: Duration::from_secs(DEFAULT_ACTIVITY_WINDOW_SECS),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_activity_threshold(mut self, threshold: i64) -> Self {
        self.activity_threshold = threshold;
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

/// Request-side identity presented on every validation call.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: String,
    pub device_type: String,
}

impl RequestContext {
    #[must_use]
    pub fn fingerprint(&self) -> String {
        device_fingerprint(&self.ip, &self.user_agent, &self.device_type)
    }
}

/// Creates, validates, rotates, and revokes sessions.
///
/// The service never touches credentials directly: it reports affected session
/// ids and the caller revokes their token lineages, so sessions and tokens
/// reference each other only by opaque id.
#[derive(Clone)]
pub struct SessionService {
    config: SessionConfig,
    blobs: SessionBlobs,
    index: Arc<dyn SessionIndex>,
    cache: Arc<dyn TtlStore>,
}

fn activity_key(session_id: Uuid) -> String {
    format!("activity:sid:{session_id}")
}

impl SessionService {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        blobs: SessionBlobs,
        index: Arc<dyn SessionIndex>,
        cache: Arc<dyn TtlStore>,
    ) -> Self {
        Self {
            config,
            blobs,
            index,
            cache,
        }
    }

    /// Create a session bound to the caller's device identity and an initial
    /// risk score, evicting the least-recently-used session when the user is
    /// at the concurrent-session cap.
    ///
    /// Returns the new session and the evicted session ids; the caller must
    /// revoke the evicted sessions' credentials.
    ///
    /// # Errors
    /// Returns an error if the index transaction or the blob write fails.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        context: &RequestContext,
        permissions: Vec<String>,
        risk_score: u8,
    ) -> Result<(Session, Vec<Uuid>), AuthError> {
        let session = Session::new(
            user_id,
            context.ip.clone(),
            context.fingerprint(),
            permissions,
            risk_score,
        );

        let evicted = self
            .index
            .insert_with_cap(&session, self.config.max_sessions)
            .await?;
        for id in &evicted {
            // Index row is already revoked; the blob can just disappear.
            if let Err(e) = self.blobs.remove(*id).await {
                warn!("failed to drop evicted session blob {id}: {e}");
            }
        }

        self.blobs.put(&session).await?;
        Ok((session, evicted))
    }

    /// Validate a session against the presented request identity.
    ///
    /// Rejections are typed: a vanished blob is [`AuthError::Expired`], a
    /// revoked session is [`SecurityAlert::SessionRevoked`], and identity
    /// mismatches surface as [`SecurityAlert::IpMismatch`] or
    /// [`SecurityAlert::FingerprintMismatch`] so callers can treat them as
    /// hijack signals rather than stale logins.
    ///
    /// Activity bookkeeping is eventually consistent: counter and index
    /// updates are best-effort and never fail a valid request.
    ///
    /// # Errors
    /// Returns the typed denial or a store failure.
    pub async fn validate_session(
        &self,
        session_id: Uuid,
        context: &RequestContext,
    ) -> Result<Session, AuthError> {
        let Some(mut session) = self.blobs.get(session_id).await? else {
            return Err(AuthError::Expired);
        };

        match session.status {
            SessionStatus::Active => {}
            SessionStatus::Revoked => return Err(SecurityAlert::SessionRevoked.into()),
            SessionStatus::Expired => return Err(AuthError::Expired),
        }
        if session.ip_address != context.ip {
            return Err(SecurityAlert::IpMismatch.into());
        }
        if session.device_fingerprint != context.fingerprint() {
            return Err(SecurityAlert::FingerprintMismatch.into());
        }

        match self
            .cache
            .incr(&activity_key(session_id), self.config.activity_window)
            .await
        {
            Ok(count) if count > self.config.activity_threshold => {
                return Err(SecurityAlert::AccessAnomaly.into());
            }
            Ok(_) => {}
            Err(e) => warn!("activity counter unavailable for {session_id}: {e}"),
        }

        session.access_count += 1;
        session.last_accessed_at = Utc::now();
        if let Err(e) = self.blobs.put(&session).await {
            warn!("failed to persist session activity for {session_id}: {e}");
        }
        if let Err(e) = self.index.touch(session_id, session.last_accessed_at).await {
            warn!("failed to touch session index for {session_id}: {e}");
        }

        Ok(session)
    }

    /// Record that the session passed an MFA verification.
    ///
    /// # Errors
    /// Returns an error if the session is gone or the write fails.
    pub async fn mark_mfa_verified(&self, session_id: Uuid) -> Result<(), AuthError> {
        let Some(mut session) = self.blobs.get(session_id).await? else {
            return Err(AuthError::Expired);
        };
        session.mfa_verified = true;
        self.blobs.put(&session).await
    }

    /// Issue a fresh opaque handle for an existing session, retiring the old
    /// one. Limits the blast radius of a leaked handle without disturbing the
    /// session's state or history.
    ///
    /// # Errors
    /// Returns an error if the session is gone or a write fails.
    pub async fn rotate_handle(&self, session_id: Uuid) -> Result<Uuid, AuthError> {
        let Some(mut session) = self.blobs.get(session_id).await? else {
            return Err(AuthError::Expired);
        };

        let new_id = Uuid::new_v4();
        session.session_id = new_id;

        self.blobs.put(&session).await?;
        self.index.rename(session_id, new_id).await?;
        self.blobs.remove(session_id).await?;
        Ok(new_id)
    }

    /// Revoke one session immediately.
    ///
    /// # Errors
    /// Returns an error if a write fails.
    pub async fn revoke(&self, session_id: Uuid) -> Result<(), AuthError> {
        if let Some(mut session) = self.blobs.get(session_id).await? {
            session.status = SessionStatus::Revoked;
            self.blobs.put(&session).await?;
        }
        self.index.set_status(session_id, SessionStatus::Revoked).await
    }

    /// Revoke every active session for a user. Returns the revoked ids; the
    /// caller must revoke their credentials.
    ///
    /// # Errors
    /// Returns an error if the index update fails.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<Vec<Uuid>, AuthError> {
        let revoked = self.index.revoke_all(user_id).await?;
        for id in &revoked {
            if let Err(e) = self.blobs.remove(*id).await {
                warn!("failed to drop revoked session blob {id}: {e}");
            }
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_key;
    use crate::session::store::MemoryIndex;
    use crate::store::MemoryStore;

    fn context() -> RequestContext {
        RequestContext {
            ip: "203.0.113.7".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            device_type: "desktop".to_string(),
        }
    }

    fn service(config: SessionConfig) -> SessionService {
        let cache: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let blobs = SessionBlobs::new(
            cache.clone(),
            derive_key(b"session-secret"),
            config.session_ttl(),
        );
        SessionService::new(config, blobs, Arc::new(MemoryIndex::new()), cache)
    }

    #[tokio::test]
    async fn created_session_validates_with_same_context() -> Result<(), AuthError> {
        let service = service(SessionConfig::default());
        let (session, evicted) = service
            .create_session(Uuid::new_v4(), &context(), vec!["accounts:read".to_string()], 10)
            .await?;
        assert!(evicted.is_empty());

        let validated = service.validate_session(session.session_id, &context()).await?;
        assert_eq!(validated.access_count, 1);
        assert_eq!(validated.permissions, session.permissions);
        Ok(())
    }

    #[tokio::test]
    async fn ip_change_is_a_typed_alert() -> Result<(), AuthError> {
        let service = service(SessionConfig::default());
        let (session, _) = service
            .create_session(Uuid::new_v4(), &context(), vec![], 10)
            .await?;

        let mut moved = context();
        moved.ip = "198.51.100.20".to_string();
        let result = service.validate_session(session.session_id, &moved).await;
        assert!(matches!(
            result,
            Err(AuthError::Security(SecurityAlert::IpMismatch))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn device_change_is_a_typed_alert() -> Result<(), AuthError> {
        let service = service(SessionConfig::default());
        let (session, _) = service
            .create_session(Uuid::new_v4(), &context(), vec![], 10)
            .await?;

        let mut other_device = context();
        other_device.user_agent = "curl/8.4".to_string();
        let result = service.validate_session(session.session_id, &other_device).await;
        assert!(matches!(
            result,
            Err(AuthError::Security(SecurityAlert::FingerprintMismatch))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_session_is_expired_not_hijacked() {
        let service = service(SessionConfig::default());
        let result = service.validate_session(Uuid::new_v4(), &context()).await;
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[tokio::test]
    async fn sixth_login_evicts_the_oldest_session() -> Result<(), AuthError> {
        let service = service(SessionConfig::default());
        let user = Uuid::new_v4();

        let (first, _) = service.create_session(user, &context(), vec![], 10).await?;
        for _ in 0..4 {
            let (_, evicted) = service.create_session(user, &context(), vec![], 10).await?;
            assert!(evicted.is_empty());
        }

        let (_, evicted) = service.create_session(user, &context(), vec![], 10).await?;
        assert_eq!(evicted, vec![first.session_id]);

        let result = service.validate_session(first.session_id, &context()).await;
        assert!(matches!(result, Err(AuthError::Expired)));
        Ok(())
    }

    #[tokio::test]
    async fn excessive_activity_trips_the_anomaly_alert() -> Result<(), AuthError> {
        let service = service(SessionConfig::default().with_activity_threshold(3));
        let (session, _) = service
            .create_session(Uuid::new_v4(), &context(), vec![], 10)
            .await?;

        for _ in 0..3 {
            service.validate_session(session.session_id, &context()).await?;
        }
        let result = service.validate_session(session.session_id, &context()).await;
        assert!(matches!(
            result,
            Err(AuthError::Security(SecurityAlert::AccessAnomaly))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn rotated_handle_retires_the_old_one() -> Result<(), AuthError> {
        let service = service(SessionConfig::default());
        let (session, _) = service
            .create_session(Uuid::new_v4(), &context(), vec!["pay".to_string()], 10)
            .await?;

        let new_id = service.rotate_handle(session.session_id).await?;
        assert_ne!(new_id, session.session_id);

        let validated = service.validate_session(new_id, &context()).await?;
        assert_eq!(validated.permissions, session.permissions);
        assert!(matches!(
            service.validate_session(session.session_id, &context()).await,
            Err(AuthError::Expired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_clears_every_session() -> Result<(), AuthError> {
        let service = service(SessionConfig::default());
        let user = Uuid::new_v4();
        let (a, _) = service.create_session(user, &context(), vec![], 10).await?;
        let (b, _) = service.create_session(user, &context(), vec![], 10).await?;

        let revoked = service.revoke_all(user).await?;
        assert_eq!(revoked.len(), 2);
        for id in [a.session_id, b.session_id] {
            assert!(matches!(
                service.validate_session(id, &context()).await,
                Err(AuthError::Expired)
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn mfa_verification_is_persisted() -> Result<(), AuthError> {
        let service = service(SessionConfig::default());
        let (session, _) = service
            .create_session(Uuid::new_v4(), &context(), vec![], 10)
            .await?;
        assert!(!session.mfa_verified);

        service.mark_mfa_verified(session.session_id).await?;
        let validated = service.validate_session(session.session_id, &context()).await?;
        assert!(validated.mfa_verified);
        Ok(())
    }
}
