//! MFA enrollment, challenge, and verification.
//!
//! Per configuration the state machine is `pending_setup -> enabled ->
//! disabled`; a configuration only becomes enabled after one successful
//! verification. Every check, success or failure, lands in the append-only
//! verification log and in the risk engine's counters before the caller sees
//! the outcome.

use super::backup::{normalize_backup_code, verify_backup_code, BackupCodeBatch};
use super::dispatch::{generate_numeric_code, CodeSender};
use super::models::{ConfigRecord, ConfigState, MfaMethod, VerificationAttempt};
use super::repo::MfaRepo;
use super::totp::{self, TotpEnrollment};
use crate::crypto::{open, seal, sha256_hex};
use crate::error::{AuthError, SecurityAlert};
use crate::risk::{EventContext, RiskEngine, RiskEventKind};
use crate::store::TtlStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_CODE_TTL_SECS: u64 = 5 * 60;
/// A TOTP code stays burned for the step plus the allowed skew.
const TOTP_REPLAY_TTL: Duration = Duration::from_secs(90);

/// Service-level MFA settings.
#[derive(Clone, Debug)]
pub struct MfaSettings {
    issuer: String,
    code_ttl: Duration,
}

impl MfaSettings {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self {
            issuer,
            code_ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECS),
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.code_ttl = Duration::from_secs(seconds);
        self
    }
}

/// Request identity attached to every verification attempt.
#[derive(Clone, Debug)]
pub struct MfaContext {
    pub ip: String,
    pub user_agent: String,
    pub fingerprint: Option<String>,
}

impl MfaContext {
    fn event(&self, user_id: Uuid) -> EventContext {
        EventContext {
            user_id: Some(user_id),
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
            fingerprint: self.fingerprint.clone(),
            user_locked: false,
        }
    }
}

/// What a setup call hands back to the user, exactly once.
#[derive(Debug)]
pub struct FactorSetup {
    pub config_id: Uuid,
    pub method: MfaMethod,
    pub totp: Option<TotpEnrollment>,
    pub backup_codes: Vec<String>,
}

/// An issued challenge: which configuration the user must answer with.
#[derive(Clone, Debug)]
pub struct ChallengeInfo {
    pub config_id: Uuid,
    pub method: MfaMethod,
}

/// Successful verification outcome.
#[derive(Clone, Debug)]
pub struct VerifyOutcome {
    pub config_id: Option<Uuid>,
    /// Set when a backup code was consumed.
    pub remaining_backup_codes: Option<i64>,
}

/// Manages factor enrollment and verification for the closed method set.
#[derive(Clone)]
pub struct MfaService {
    settings: MfaSettings,
    repo: Arc<dyn MfaRepo>,
    store: Arc<dyn TtlStore>,
    risk: RiskEngine,
    sender: Arc<dyn CodeSender>,
    key: [u8; 32],
}

fn code_key(config_id: Uuid) -> String {
    format!("mfa:code:{config_id}")
}

fn totp_replay_key(config_id: Uuid, code: &str) -> String {
    format!("totp:used:{config_id}:{code}")
}

fn secret_aad(config_id: Uuid) -> String {
    format!("mfa:v1|{config_id}")
}

impl MfaService {
    #[must_use]
    pub fn new(
        settings: MfaSettings,
        repo: Arc<dyn MfaRepo>,
        store: Arc<dyn TtlStore>,
        risk: RiskEngine,
        sender: Arc<dyn CodeSender>,
        key: [u8; 32],
    ) -> Self {
        Self {
            settings,
            repo,
            store,
            risk,
            sender,
            key,
        }
    }

    /// Start enrollment of a factor. The configuration stays `pending_setup`
    /// until [`MfaService::verify_setup`] succeeds. Backup codes are
    /// generated here regardless of the chosen method and shown exactly once.
    ///
    /// # Errors
    /// Returns a validation error for a missing destination, and store or
    /// dispatch errors otherwise.
    pub async fn setup_factor(
        &self,
        user_id: Uuid,
        method: MfaMethod,
        destination: Option<&str>,
        account_label: &str,
    ) -> Result<FactorSetup, AuthError> {
        let config_id = Uuid::new_v4();
        let is_primary = self.repo.config_for_user(user_id, None).await?.is_none();

        let mut record = ConfigRecord {
            config_id,
            user_id,
            method,
            state: ConfigState::PendingSetup,
            is_primary,
            sealed_secret: None,
            sealed_destination: None,
            verified_at: None,
            last_used_at: None,
            created_at: Utc::now(),
        };

        let enrollment = match method {
            MfaMethod::Totp => {
                let secret = totp::generate_secret()?;
                let enrollment = totp::enrollment(&secret, &self.settings.issuer, account_label)?;
                record.sealed_secret = Some(
                    seal(&self.key, &secret, secret_aad(config_id).as_bytes())
                        .map_err(|e| AuthError::Configuration(e.to_string()))?,
                );
                Some(enrollment)
            }
            MfaMethod::Sms | MfaMethod::Email => {
                let destination = destination.ok_or_else(|| {
                    AuthError::Validation(format!(
                        "{} setup requires a destination",
                        method.as_str()
                    ))
                })?;
                record.sealed_destination = Some(
                    seal(
                        &self.key,
                        destination.as_bytes(),
                        secret_aad(config_id).as_bytes(),
                    )
                    .map_err(|e| AuthError::Configuration(e.to_string()))?,
                );
                self.dispatch_code(config_id, destination).await?;
                None
            }
        };

        self.repo.insert_config(&record).await?;

        let batch = BackupCodeBatch::generate();
        self.repo
            .replace_backup_codes(user_id, &batch.code_hashes)
            .await?;

        Ok(FactorSetup {
            config_id,
            method,
            totp: enrollment,
            backup_codes: batch.codes,
        })
    }

    /// Confirm enrollment with a first code; flips the configuration to
    /// `enabled`. Idempotent for an already-enabled configuration.
    ///
    /// # Errors
    /// Returns `AuthenticationFailed` on a wrong code.
    pub async fn verify_setup(
        &self,
        config_id: Uuid,
        code: &str,
        context: &MfaContext,
    ) -> Result<(), AuthError> {
        let config = self
            .repo
            .config(config_id)
            .await?
            .ok_or_else(|| AuthError::Validation("unknown configuration".to_string()))?;
        match config.state {
            ConfigState::PendingSetup => {}
            ConfigState::Enabled => return Ok(()),
            ConfigState::Disabled => {
                return Err(AuthError::Validation("configuration is disabled".to_string()))
            }
        }

        let valid = self.check_code(&config, code, false).await?;
        self.log_attempt(&config, code, valid, context, (!valid).then(|| "setup code mismatch"))
            .await;
        if valid {
            self.repo.enable(config_id).await?;
            Ok(())
        } else {
            Err(AuthError::AuthenticationFailed(
                "invalid verification code".to_string(),
            ))
        }
    }

    /// Issue a challenge: pick the primary (or requested) enabled factor and
    /// dispatch a one-time code where the method needs one.
    ///
    /// # Errors
    /// Fails when the user has no enabled factor of the requested kind.
    pub async fn challenge(
        &self,
        user_id: Uuid,
        method: Option<MfaMethod>,
    ) -> Result<ChallengeInfo, AuthError> {
        let config = self
            .repo
            .config_for_user(user_id, method)
            .await?
            .ok_or_else(|| {
                AuthError::AuthenticationFailed("no enabled factor for user".to_string())
            })?;

        if matches!(config.method, MfaMethod::Sms | MfaMethod::Email) {
            let sealed = config.sealed_destination.as_deref().ok_or_else(|| {
                AuthError::Configuration("factor has no destination".to_string())
            })?;
            let destination = open(&self.key, sealed, secret_aad(config.config_id).as_bytes())
                .map_err(|e| AuthError::Configuration(e.to_string()))?;
            let destination = String::from_utf8(destination)
                .map_err(|e| AuthError::Configuration(format!("destination encoding: {e}")))?;
            self.dispatch_code(config.config_id, &destination).await?;
        }

        Ok(ChallengeInfo {
            config_id: config.config_id,
            method: config.method,
        })
    }

    /// Verify a code. The adaptive rate gate runs before any code is
    /// examined and fails closed. Every attempt is logged, and one-time codes
    /// (SMS/email, TOTP window entries, backup codes) can never be replayed.
    ///
    /// # Errors
    /// Returns `RateLimited`, `AuthenticationFailed`, or a dependency error.
    pub async fn verify_code(
        &self,
        user_id: Uuid,
        code: &str,
        config_id: Option<Uuid>,
        is_backup: bool,
        context: &MfaContext,
    ) -> Result<VerifyOutcome, AuthError> {
        self.risk
            .rate_gate(&format!("mfa:{user_id}"), &context.ip)
            .await?;

        // Every attempt is scored and audited before any code is examined.
        let assessment = self
            .risk
            .assess(RiskEventKind::MfaAttempt, &context.event(user_id))
            .await;
        if assessment.blocked {
            return Err(SecurityAlert::RateLimited.into());
        }

        if is_backup {
            return self.verify_backup(user_id, code, context).await;
        }

        let config = match config_id {
            Some(id) => {
                let config = self
                    .repo
                    .config(id)
                    .await?
                    .filter(|c| c.user_id == user_id && c.state == ConfigState::Enabled);
                config.ok_or_else(|| {
                    AuthError::AuthenticationFailed("no enabled factor for user".to_string())
                })?
            }
            None => self
                .repo
                .config_for_user(user_id, None)
                .await?
                .ok_or_else(|| {
                    AuthError::AuthenticationFailed("no enabled factor for user".to_string())
                })?,
        };

        let valid = self.check_code(&config, code, true).await?;
        self.log_attempt(&config, code, valid, context, (!valid).then(|| "code mismatch"))
            .await;

        if valid {
            self.repo.touch_last_used(config.config_id).await?;
            self.risk.record_success(&context.event(user_id)).await;
            Ok(VerifyOutcome {
                config_id: Some(config.config_id),
                remaining_backup_codes: None,
            })
        } else {
            self.risk.record_failure(&context.event(user_id)).await;
            Err(AuthError::AuthenticationFailed(
                "invalid verification code".to_string(),
            ))
        }
    }

    /// Mint a fresh backup-code batch, invalidating every prior code.
    ///
    /// # Errors
    /// Returns an error if persistence fails.
    pub async fn regenerate_backup_codes(&self, user_id: Uuid) -> Result<Vec<String>, AuthError> {
        let batch = BackupCodeBatch::generate();
        self.repo
            .replace_backup_codes(user_id, &batch.code_hashes)
            .await?;
        Ok(batch.codes)
    }

    /// Explicitly retire a factor.
    ///
    /// # Errors
    /// Fails when the configuration does not belong to the user.
    pub async fn disable_factor(&self, user_id: Uuid, config_id: Uuid) -> Result<(), AuthError> {
        let config = self
            .repo
            .config(config_id)
            .await?
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| AuthError::Validation("unknown configuration".to_string()))?;
        self.repo.disable(config.config_id).await
    }

    async fn verify_backup(
        &self,
        user_id: Uuid,
        code: &str,
        context: &MfaContext,
    ) -> Result<VerifyOutcome, AuthError> {
        let normalized = normalize_backup_code(code)?;
        let codes = self.repo.unused_backup_codes(user_id).await?;

        let matched = codes
            .iter()
            .find(|candidate| verify_backup_code(&normalized, &candidate.code_hash));

        let consumed = match matched {
            Some(candidate) => self.repo.consume_backup_code(candidate.id).await?,
            None => false,
        };

        let attempt = VerificationAttempt {
            id: Uuid::new_v4(),
            user_id,
            config_id: None,
            method: "backup",
            code_hash: sha256_hex(normalized.as_bytes()),
            success: consumed,
            ip: context.ip.clone(),
            user_agent: context.user_agent.clone(),
            fingerprint: context.fingerprint.clone(),
            failure_reason: (!consumed).then(|| "backup code mismatch".to_string()),
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.record_attempt(&attempt).await {
            warn!("failed to record verification attempt: {e}");
        }

        if consumed {
            let remaining = self.repo.unused_backup_codes(user_id).await?.len();
            self.risk.record_success(&context.event(user_id)).await;
            Ok(VerifyOutcome {
                config_id: None,
                remaining_backup_codes: Some(remaining as i64),
            })
        } else {
            self.risk.record_failure(&context.event(user_id)).await;
            Err(AuthError::AuthenticationFailed(
                "invalid backup code".to_string(),
            ))
        }
    }

    /// Check a code against a configuration. `burn_totp` controls whether a
    /// valid TOTP entry is marked consumed for its window; setup verification
    /// leaves the entry usable for the login that usually follows.
    async fn check_code(
        &self,
        config: &ConfigRecord,
        code: &str,
        burn_totp: bool,
    ) -> Result<bool, AuthError> {
        match config.method {
            MfaMethod::Totp => {
                let sealed = config
                    .sealed_secret
                    .as_deref()
                    .ok_or_else(|| AuthError::Configuration("factor has no secret".to_string()))?;
                let secret = open(&self.key, sealed, secret_aad(config.config_id).as_bytes())
                    .map_err(|e| AuthError::Configuration(e.to_string()))?;
                if !totp::verify(&secret, &self.settings.issuer, code)? {
                    return Ok(false);
                }
                if burn_totp {
                    // A window entry is single-use; the loser of this claim
                    // is replaying.
                    let fresh = self
                        .store
                        .set_nx(
                            &totp_replay_key(config.config_id, code),
                            "1",
                            TOTP_REPLAY_TTL,
                        )
                        .await
                        .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?;
                    return Ok(fresh);
                }
                Ok(true)
            }
            MfaMethod::Sms | MfaMethod::Email => {
                let Some(stored_hash) = self
                    .store
                    .take(&code_key(config.config_id))
                    .await
                    .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?
                else {
                    return Ok(false);
                };
                let presented = sha256_hex(code.as_bytes());
                Ok(presented.as_bytes().ct_eq(stored_hash.as_bytes()).into())
            }
        }
    }

    async fn dispatch_code(&self, config_id: Uuid, destination: &str) -> Result<(), AuthError> {
        let code = generate_numeric_code();
        self.store
            .set(
                &code_key(config_id),
                &sha256_hex(code.as_bytes()),
                Some(self.settings.code_ttl),
            )
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?;
        self.sender
            .send(destination, &code)
            .await
            .map_err(|e| AuthError::DependencyUnavailable(format!("code dispatch: {e}")))
    }

    async fn log_attempt(
        &self,
        config: &ConfigRecord,
        code: &str,
        success: bool,
        context: &MfaContext,
        failure_reason: Option<&str>,
    ) {
        let attempt = VerificationAttempt {
            id: Uuid::new_v4(),
            user_id: config.user_id,
            config_id: Some(config.config_id),
            method: config.method.as_str(),
            code_hash: sha256_hex(code.as_bytes()),
            success,
            ip: context.ip.clone(),
            user_agent: context.user_agent.clone(),
            fingerprint: context.fingerprint.clone(),
            failure_reason: failure_reason.map(str::to_string),
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.record_attempt(&attempt).await {
            warn!("failed to record verification attempt: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mfa::repo::MemoryMfaRepo;
    use crate::risk::{MemoryRiskAudit, NullGeoProvider, RiskConfig};
    use crate::store::MemoryStore;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use totp_rs::{Algorithm, Secret, TOTP};

    /// Sender that records the last dispatched code.
    #[derive(Default)]
    struct RecordingSender {
        last: tokio::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl CodeSender for RecordingSender {
        async fn send(&self, _destination: &str, code: &str) -> AnyResult<()> {
            *self.last.lock().await = Some(code.to_string());
            Ok(())
        }
    }

    struct Harness {
        service: MfaService,
        repo: Arc<MemoryMfaRepo>,
        sender: Arc<RecordingSender>,
    }

    fn harness() -> Harness {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryMfaRepo::new());
        let sender = Arc::new(RecordingSender::default());
        let risk = RiskEngine::new(
            RiskConfig::default(),
            store.clone(),
            Arc::new(NullGeoProvider),
            None,
        );
        let service = MfaService::new(
            MfaSettings::new("custodia".to_string()),
            repo.clone(),
            store,
            risk,
            sender.clone(),
            crate::crypto::derive_key(b"mfa-secret"),
        );
        Harness {
            service,
            repo,
            sender,
        }
    }

    fn context() -> MfaContext {
        MfaContext {
            ip: "203.0.113.7".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            fingerprint: Some("fp-1".to_string()),
        }
    }

    fn current_totp_code(secret_base32: &str) -> String {
        let secret = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .expect("valid base32 secret");
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some("custodia".to_string()),
            "user".to_string(),
        )
        .expect("valid totp context");
        totp.generate_current().expect("system clock")
    }

    #[tokio::test]
    async fn totp_enrollment_enables_after_first_verification() -> Result<(), AuthError> {
        let h = harness();
        let user = Uuid::new_v4();

        let setup = h
            .service
            .setup_factor(user, MfaMethod::Totp, None, "user@example.com")
            .await?;
        let enrollment = setup.totp.as_ref().ok_or(AuthError::Expired)?;
        assert_eq!(setup.backup_codes.len(), 10);

        // Not usable for challenges until verified.
        assert!(h.service.challenge(user, None).await.is_err());

        let code = current_totp_code(&enrollment.secret_base32);
        h.service.verify_setup(setup.config_id, &code, &context()).await?;

        let challenge = h.service.challenge(user, None).await?;
        assert_eq!(challenge.config_id, setup.config_id);
        assert_eq!(challenge.method, MfaMethod::Totp);
        Ok(())
    }

    #[tokio::test]
    async fn totp_codes_are_single_use_per_window() -> Result<(), AuthError> {
        let h = harness();
        let user = Uuid::new_v4();

        let setup = h
            .service
            .setup_factor(user, MfaMethod::Totp, None, "user@example.com")
            .await?;
        let enrollment = setup.totp.as_ref().ok_or(AuthError::Expired)?;
        let code = current_totp_code(&enrollment.secret_base32);
        h.service.verify_setup(setup.config_id, &code, &context()).await?;

        h.service
            .verify_code(user, &code, Some(setup.config_id), false, &context())
            .await?;
        let replay = h
            .service
            .verify_code(user, &code, Some(setup.config_id), false, &context())
            .await;
        assert!(matches!(replay, Err(AuthError::AuthenticationFailed(_))));
        Ok(())
    }

    #[tokio::test]
    async fn sms_codes_are_dispatched_and_consumed_once() -> Result<(), AuthError> {
        let h = harness();
        let user = Uuid::new_v4();

        let setup = h
            .service
            .setup_factor(user, MfaMethod::Sms, Some("+15550100"), "user@example.com")
            .await?;
        let sent = h.sender.last.lock().await.clone().ok_or(AuthError::Expired)?;
        h.service.verify_setup(setup.config_id, &sent, &context()).await?;

        let challenge = h.service.challenge(user, Some(MfaMethod::Sms)).await?;
        let code = h.sender.last.lock().await.clone().ok_or(AuthError::Expired)?;

        h.service
            .verify_code(user, &code, Some(challenge.config_id), false, &context())
            .await?;
        let replay = h
            .service
            .verify_code(user, &code, Some(challenge.config_id), false, &context())
            .await;
        assert!(matches!(replay, Err(AuthError::AuthenticationFailed(_))));
        Ok(())
    }

    #[tokio::test]
    async fn sms_setup_without_destination_is_a_validation_error() {
        let h = harness();
        let result = h
            .service
            .setup_factor(Uuid::new_v4(), MfaMethod::Sms, None, "user@example.com")
            .await;
        assert!(matches!(result, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn backup_codes_are_single_use_and_counted() -> Result<(), AuthError> {
        let h = harness();
        let user = Uuid::new_v4();
        let setup = h
            .service
            .setup_factor(user, MfaMethod::Totp, None, "user@example.com")
            .await?;
        let code = setup.backup_codes.first().ok_or(AuthError::Expired)?.clone();

        let outcome = h.service.verify_code(user, &code, None, true, &context()).await?;
        assert_eq!(outcome.remaining_backup_codes, Some(9));

        let replay = h.service.verify_code(user, &code, None, true, &context()).await;
        assert!(matches!(replay, Err(AuthError::AuthenticationFailed(_))));

        // The failed replay consumed nothing further.
        assert_eq!(h.repo.unused_backup_codes(user).await?.len(), 9);
        Ok(())
    }

    #[tokio::test]
    async fn regeneration_invalidates_prior_codes() -> Result<(), AuthError> {
        let h = harness();
        let user = Uuid::new_v4();
        let setup = h
            .service
            .setup_factor(user, MfaMethod::Totp, None, "user@example.com")
            .await?;
        let old = setup.backup_codes.first().ok_or(AuthError::Expired)?.clone();

        let fresh = h.service.regenerate_backup_codes(user).await?;
        assert_eq!(fresh.len(), 10);

        let result = h.service.verify_code(user, &old, None, true, &context()).await;
        assert!(matches!(result, Err(AuthError::AuthenticationFailed(_))));
        Ok(())
    }

    #[tokio::test]
    async fn every_attempt_is_recorded() -> Result<(), AuthError> {
        let h = harness();
        let user = Uuid::new_v4();
        let setup = h
            .service
            .setup_factor(user, MfaMethod::Totp, None, "user@example.com")
            .await?;
        let enrollment = setup.totp.as_ref().ok_or(AuthError::Expired)?;
        let code = current_totp_code(&enrollment.secret_base32);
        h.service.verify_setup(setup.config_id, &code, &context()).await?;

        let _ = h
            .service
            .verify_code(user, "000000", Some(setup.config_id), false, &context())
            .await;

        let attempts = h.repo.attempts().await;
        // Setup success plus the failed login attempt.
        assert!(attempts.len() >= 2);
        let last = attempts.last().ok_or(AuthError::Expired)?;
        assert!(!last.success || code == "000000");
        assert_eq!(last.ip, "203.0.113.7");
        Ok(())
    }

    #[tokio::test]
    async fn rate_gate_runs_before_code_checks() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryMfaRepo::new());
        let risk = RiskEngine::new(
            RiskConfig::default().with_rate_limit_max(2),
            store.clone(),
            Arc::new(NullGeoProvider),
            None,
        );
        let service = MfaService::new(
            MfaSettings::new("custodia".to_string()),
            repo,
            store,
            risk,
            Arc::new(RecordingSender::default()),
            crate::crypto::derive_key(b"mfa-secret"),
        );
        let user = Uuid::new_v4();

        for _ in 0..2 {
            let _ = service
                .verify_code(user, "000000", None, false, &context())
                .await;
        }
        let gated = service
            .verify_code(user, "000000", None, false, &context())
            .await;
        assert!(matches!(
            gated,
            Err(AuthError::Security(crate::error::SecurityAlert::RateLimited))
        ));
    }

    #[tokio::test]
    async fn verify_attempts_land_in_the_risk_audit_trail() -> Result<(), AuthError> {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryRiskAudit::new());
        let risk = RiskEngine::new(
            RiskConfig::default(),
            store.clone(),
            Arc::new(NullGeoProvider),
            Some(audit.clone()),
        );
        let service = MfaService::new(
            MfaSettings::new("custodia".to_string()),
            Arc::new(MemoryMfaRepo::new()),
            store,
            risk,
            Arc::new(RecordingSender::default()),
            crate::crypto::derive_key(b"mfa-secret"),
        );
        let user = Uuid::new_v4();

        let setup = service
            .setup_factor(user, MfaMethod::Totp, None, "user@example.com")
            .await?;
        let enrollment = setup.totp.as_ref().ok_or(AuthError::Expired)?;
        let code = current_totp_code(&enrollment.secret_base32);
        service.verify_setup(setup.config_id, &code, &context()).await?;

        // An eight-digit code can never match a six-digit factor.
        let wrong = service
            .verify_code(user, "00000000", Some(setup.config_id), false, &context())
            .await;
        assert!(wrong.is_err());

        let events = audit.events();
        assert!(events.iter().any(|e| e.kind == "mfa_attempt"));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_factor_is_not_challengeable() -> Result<(), AuthError> {
        let h = harness();
        let user = Uuid::new_v4();
        let setup = h
            .service
            .setup_factor(user, MfaMethod::Totp, None, "user@example.com")
            .await?;
        let enrollment = setup.totp.as_ref().ok_or(AuthError::Expired)?;
        let code = current_totp_code(&enrollment.secret_base32);
        h.service.verify_setup(setup.config_id, &code, &context()).await?;

        h.service.disable_factor(user, setup.config_id).await?;
        assert!(h.service.challenge(user, None).await.is_err());
        Ok(())
    }
}
