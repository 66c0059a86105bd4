//! Token issuance, validation, rotation, and revocation.

use super::claims::{decode_claims, encode_claims, Claims, TokenKind};
use crate::error::{AuthError, SecurityAlert};
use crate::store::TtlStore;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_REMEMBER_TTL_SECS: u64 = 30 * 24 * 60 * 60;
const MIN_SECRET_BYTES: usize = 32;

/// Token signing configuration, validated at startup.
#[derive(Clone, Debug)]
pub struct TokenConfig {
    issuer: String,
    audience: String,
    access_secret: SecretString,
    refresh_secret: SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
    remember_ttl: Duration,
}

impl TokenConfig {
    #[must_use]
    pub fn new(issuer: String, audience: String, access_secret: SecretString, refresh_secret: SecretString) -> Self {
        Self {
            issuer,
            audience,
            access_secret,
            refresh_secret,
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECS),
            remember_ttl: Duration::from_secs(DEFAULT_REMEMBER_TTL_SECS),
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: u64) -> Self {
        self.remember_ttl = Duration::from_secs(seconds);
        self
    }

    /// Enforce the signing invariants: distinct secrets per credential kind,
    /// each with at least 256 bits of material.
    ///
    /// # Errors
    /// Returns a fatal [`AuthError::Configuration`] on violation; the service
    /// must not start.
    pub fn validate(&self) -> Result<(), AuthError> {
        let access = self.access_secret.expose_secret();
        let refresh = self.refresh_secret.expose_secret();
        if access.len() < MIN_SECRET_BYTES {
            return Err(AuthError::Configuration(format!(
                "access-token secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        if refresh.len() < MIN_SECRET_BYTES {
            return Err(AuthError::Configuration(format!(
                "refresh-token secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        if access == refresh {
            return Err(AuthError::Configuration(
                "access and refresh token secrets must differ".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }
}

/// The pair handed to clients on login and refresh.
#[derive(Clone, Debug, serde::Serialize, utoipa::ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access credential lifetime in seconds.
    pub expires_in: u64,
}

/// Issues, validates, rotates, and revokes credential pairs.
///
/// Revocation entries are self-expiring: each key carries a TTL equal to the
/// credential's remaining lifetime, so the blacklist never outlives the tokens
/// it denies.
#[derive(Clone)]
pub struct TokenService {
    config: TokenConfig,
    store: Arc<dyn TtlStore>,
}

fn jti_key(jti: Uuid) -> String {
    format!("revoked:jti:{jti}")
}

fn family_key(family: Uuid) -> String {
    format!("revoked:fam:{family}")
}

fn session_key(session_id: Uuid) -> String {
    format!("revoked:sid:{session_id}")
}

fn rotation_key(jti: Uuid) -> String {
    format!("rotated:jti:{jti}")
}

impl TokenService {
    /// Build the service, enforcing the configuration invariants.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] if the secrets are invalid.
    pub fn new(config: TokenConfig, store: Arc<dyn TtlStore>) -> Result<Self, AuthError> {
        config.validate()?;
        Ok(Self { config, store })
    }

    /// Issue an access/refresh pair scoped to a session and token family.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue_pair(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        family: Uuid,
        scope: Vec<String>,
        remember_me: bool,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now().timestamp();
        let refresh_ttl = if remember_me {
            self.config.remember_ttl
        } else {
            self.config.refresh_ttl
        };

        let access = Claims {
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            sub: user_id,
            sid: session_id,
            fam: family,
            jti: Uuid::new_v4(),
            iat: now,
            exp: now + i64::try_from(self.config.access_ttl.as_secs()).unwrap_or(i64::MAX),
            scope: scope.clone(),
            kind: TokenKind::Access,
        };
        let refresh = Claims {
            jti: Uuid::new_v4(),
            exp: now + i64::try_from(refresh_ttl.as_secs()).unwrap_or(i64::MAX),
            kind: TokenKind::Refresh,
            scope,
            ..access.clone()
        };

        Ok(TokenPair {
            access_token: encode_claims(&access, self.config.access_secret.expose_secret().as_bytes())?,
            refresh_token: encode_claims(
                &refresh,
                self.config.refresh_secret.expose_secret().as_bytes(),
            )?,
            expires_in: self.config.access_ttl.as_secs(),
        })
    }

    /// Validate an access credential: signature, issuer/audience, expiry, and
    /// the revocation list.
    ///
    /// A positive revocation hit fails closed. An unreachable revocation store
    /// fails open with a logged warning: availability is preferred over strict
    /// consistency for reads, since every entry expires with its token anyway.
    ///
    /// # Errors
    /// Returns the typed denial for the caller to surface.
    pub async fn validate_access(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode_claims(
            token,
            self.config.access_secret.expose_secret().as_bytes(),
            &self.config.issuer,
            &self.config.audience,
            TokenKind::Access,
        )?;

        match self.revocation_hit(&claims).await {
            Ok(None) => Ok(claims),
            Ok(Some(alert)) => Err(AuthError::Security(alert)),
            Err(e) => {
                warn!("revocation list unreachable, failing open: {e}");
                Ok(claims)
            }
        }
    }

    /// Rotate a refresh credential: revoke it, then mint a new pair in the
    /// same family.
    ///
    /// Rotation is atomic with respect to concurrent attempts on the same
    /// credential: exactly one caller wins the claim; the rest observe reuse.
    /// Reuse of an already-rotated or revoked credential revokes the entire
    /// family, which is the conservative response to suspected token theft.
    ///
    /// # Errors
    /// Returns [`SecurityAlert::TokenReuse`] on reuse (the caller must log a
    /// high-risk event) and [`AuthError::DependencyUnavailable`] if the store
    /// cannot guarantee single-use. Rotation never fails open.
    pub async fn refresh_pair(&self, refresh_token: &str) -> Result<(TokenPair, Claims), AuthError> {
        let claims = decode_claims(
            refresh_token,
            self.config.refresh_secret.expose_secret().as_bytes(),
            &self.config.issuer,
            &self.config.audience,
            TokenKind::Refresh,
        )?;

        let store_err =
            |e: crate::store::StoreError| AuthError::DependencyUnavailable(e.to_string());
        let now = Utc::now().timestamp();
        let remaining = Duration::from_secs(claims.remaining_secs(now).max(1));

        if self
            .store
            .get(&family_key(claims.fam))
            .await
            .map_err(store_err)?
            .is_some()
        {
            return Err(AuthError::Security(SecurityAlert::TokenReuse));
        }
        if self
            .store
            .get(&jti_key(claims.jti))
            .await
            .map_err(store_err)?
            .is_some()
        {
            self.revoke_family(claims.fam).await?;
            return Err(AuthError::Security(SecurityAlert::TokenReuse));
        }
        if self
            .store
            .get(&session_key(claims.sid))
            .await
            .map_err(store_err)?
            .is_some()
        {
            return Err(AuthError::Security(SecurityAlert::SessionRevoked));
        }

        // Single-use claim: the first concurrent caller wins, everyone else
        // sees the credential as already retired.
        let won = self
            .store
            .set_nx(&rotation_key(claims.jti), "1", remaining)
            .await
            .map_err(store_err)?;
        if !won {
            self.revoke_family(claims.fam).await?;
            return Err(AuthError::Security(SecurityAlert::TokenReuse));
        }

        self.store
            .set(&jti_key(claims.jti), "rotated", Some(remaining))
            .await
            .map_err(store_err)?;

        let pair = self.issue_pair(
            claims.sub,
            claims.sid,
            claims.fam,
            claims.scope.clone(),
            false,
        )?;
        Ok((pair, claims))
    }

    /// Revoke a single access credential for its remaining lifetime.
    ///
    /// # Errors
    /// Returns an error if the credential is invalid or the store write fails.
    pub async fn revoke_access(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode_claims(
            token,
            self.config.access_secret.expose_secret().as_bytes(),
            &self.config.issuer,
            &self.config.audience,
            TokenKind::Access,
        )?;
        let remaining = Duration::from_secs(claims.remaining_secs(Utc::now().timestamp()).max(1));
        self.store
            .set(&jti_key(claims.jti), "revoked", Some(remaining))
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?;
        Ok(claims)
    }

    /// Revoke every credential scoped to a session.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn revoke_session(&self, session_id: Uuid) -> Result<(), AuthError> {
        self.store
            .set(
                &session_key(session_id),
                "revoked",
                Some(self.config.remember_ttl),
            )
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))
    }

    /// Revoke an entire token family (all live pairs from one login lineage).
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn revoke_family(&self, family: Uuid) -> Result<(), AuthError> {
        self.store
            .set(
                &family_key(family),
                "revoked",
                Some(self.config.remember_ttl),
            )
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))
    }

    async fn revocation_hit(
        &self,
        claims: &Claims,
    ) -> Result<Option<SecurityAlert>, crate::store::StoreError> {
        if self.store.get(&jti_key(claims.jti)).await?.is_some()
            || self.store.get(&family_key(claims.fam)).await?.is_some()
        {
            return Ok(Some(SecurityAlert::TokenReuse));
        }
        if self.store.get(&session_key(claims.sid)).await?.is_some() {
            return Ok(Some(SecurityAlert::SessionRevoked));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn config() -> TokenConfig {
        TokenConfig::new(
            "custodia".to_string(),
            "api".to_string(),
            SecretString::from("access-secret-access-secret-0123"),
            SecretString::from("refresh-secret-refresh-secret-01"),
        )
    }

    fn service() -> TokenService {
        TokenService::new(config(), Arc::new(MemoryStore::new())).expect("valid config")
    }

    #[test]
    fn config_rejects_short_secrets() {
        let bad = TokenConfig::new(
            "custodia".to_string(),
            "api".to_string(),
            SecretString::from("short"),
            SecretString::from("refresh-secret-refresh-secret-01"),
        );
        assert!(matches!(bad.validate(), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn config_rejects_shared_secret() {
        let bad = TokenConfig::new(
            "custodia".to_string(),
            "api".to_string(),
            SecretString::from("same-secret-same-secret-same-scr"),
            SecretString::from("same-secret-same-secret-same-scr"),
        );
        assert!(matches!(bad.validate(), Err(AuthError::Configuration(_))));
    }

    #[tokio::test]
    async fn issued_access_credential_validates() -> Result<(), AuthError> {
        let service = service();
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        let family = Uuid::new_v4();

        let pair = service.issue_pair(user, session, family, vec!["pay".to_string()], false)?;
        let claims = service.validate_access(&pair.access_token).await?;
        assert_eq!(claims.sub, user);
        assert_eq!(claims.sid, session);
        assert_eq!(claims.fam, family);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_is_single_use() -> Result<(), AuthError> {
        let service = service();
        let pair = service.issue_pair(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), vec![], false)?;

        let (next, _) = service.refresh_pair(&pair.refresh_token).await?;
        assert_ne!(next.refresh_token, pair.refresh_token);

        let second = service.refresh_pair(&pair.refresh_token).await;
        assert!(matches!(
            second,
            Err(AuthError::Security(SecurityAlert::TokenReuse))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_refresh_has_one_winner() -> Result<(), AuthError> {
        let service = service();
        let pair = service.issue_pair(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), vec![], false)?;

        let a = service.clone();
        let b = service.clone();
        let token_a = pair.refresh_token.clone();
        let token_b = pair.refresh_token.clone();
        let (ra, rb) = tokio::join!(a.refresh_pair(&token_a), b.refresh_pair(&token_b));

        assert_ne!(ra.is_ok(), rb.is_ok(), "exactly one rotation must win");
        Ok(())
    }

    #[tokio::test]
    async fn reuse_revokes_the_whole_family() -> Result<(), AuthError> {
        let service = service();
        let pair = service.issue_pair(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), vec![], false)?;

        let (next, _) = service.refresh_pair(&pair.refresh_token).await?;
        // Replay of the retired credential poisons the lineage.
        let _ = service.refresh_pair(&pair.refresh_token).await;

        let result = service.refresh_pair(&next.refresh_token).await;
        assert!(matches!(
            result,
            Err(AuthError::Security(SecurityAlert::TokenReuse))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn session_revocation_denies_both_credentials() -> Result<(), AuthError> {
        let service = service();
        let session = Uuid::new_v4();
        let pair = service.issue_pair(Uuid::new_v4(), session, Uuid::new_v4(), vec![], false)?;

        service.revoke_session(session).await?;

        assert!(matches!(
            service.validate_access(&pair.access_token).await,
            Err(AuthError::Security(SecurityAlert::SessionRevoked))
        ));
        assert!(matches!(
            service.refresh_pair(&pair.refresh_token).await,
            Err(AuthError::Security(SecurityAlert::SessionRevoked))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn revoked_access_credential_is_denied() -> Result<(), AuthError> {
        let service = service();
        let pair = service.issue_pair(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), vec![], false)?;

        service.revoke_access(&pair.access_token).await?;
        assert!(matches!(
            service.validate_access(&pair.access_token).await,
            Err(AuthError::Security(_))
        ));
        Ok(())
    }
}
