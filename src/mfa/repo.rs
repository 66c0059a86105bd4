//! Repository for factor configurations, backup codes, and the verification
//! log.
//!
//! [`PgMfaRepo`] is the production implementation; [`MemoryMfaRepo`] backs
//! tests and local development with the same semantics.

use super::models::{BackupCode, ConfigRecord, ConfigState, MfaMethod, VerificationAttempt};
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Storage seam for the MFA service.
#[async_trait]
pub trait MfaRepo: Send + Sync {
    async fn insert_config(&self, record: &ConfigRecord) -> Result<(), AuthError>;

    async fn config(&self, config_id: Uuid) -> Result<Option<ConfigRecord>, AuthError>;

    /// Resolve the user's factor: by method when given, otherwise the primary
    /// enabled configuration.
    async fn config_for_user(
        &self,
        user_id: Uuid,
        method: Option<MfaMethod>,
    ) -> Result<Option<ConfigRecord>, AuthError>;

    /// First successful verification: `pending_setup` becomes `enabled`.
    async fn enable(&self, config_id: Uuid) -> Result<(), AuthError>;

    async fn disable(&self, config_id: Uuid) -> Result<(), AuthError>;

    async fn touch_last_used(&self, config_id: Uuid) -> Result<(), AuthError>;

    /// Replace the user's backup codes in one unit: prior codes become
    /// unusable the moment the new batch lands.
    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> Result<(), AuthError>;

    async fn unused_backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCode>, AuthError>;

    /// Mark a single code consumed. Returns false if it was already used.
    async fn consume_backup_code(&self, id: Uuid) -> Result<bool, AuthError>;

    async fn record_attempt(&self, attempt: &VerificationAttempt) -> Result<(), AuthError>;
}

/// Postgres-backed MFA repository.
#[derive(Clone)]
pub struct PgMfaRepo {
    pool: PgPool,
}

impl PgMfaRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<ConfigRecord, AuthError> {
    let method: String = row.get("method");
    let state: String = row.get("state");
    Ok(ConfigRecord {
        config_id: row.get("config_id"),
        user_id: row.get("user_id"),
        method: MfaMethod::parse(&method)
            .ok_or_else(|| AuthError::Configuration(format!("unknown mfa method: {method}")))?,
        state: ConfigState::parse(&state)
            .ok_or_else(|| AuthError::Configuration(format!("unknown mfa state: {state}")))?,
        is_primary: row.get("is_primary"),
        sealed_secret: row.get("sealed_secret"),
        sealed_destination: row.get("sealed_destination"),
        verified_at: row.get("verified_at"),
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl MfaRepo for PgMfaRepo {
    async fn insert_config(&self, record: &ConfigRecord) -> Result<(), AuthError> {
        let query = r"
            INSERT INTO mfa_configs
                (config_id, user_id, method, state, is_primary,
                 sealed_secret, sealed_destination, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.config_id)
            .bind(record.user_id)
            .bind(record.method.as_str())
            .bind(record.state.as_str())
            .bind(record.is_primary)
            .bind(&record.sealed_secret)
            .bind(&record.sealed_destination)
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn config(&self, config_id: Uuid) -> Result<Option<ConfigRecord>, AuthError> {
        let query = r"
            SELECT config_id, user_id, method, state, is_primary,
                   sealed_secret, sealed_destination, verified_at, last_used_at, created_at
            FROM mfa_configs WHERE config_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(config_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn config_for_user(
        &self,
        user_id: Uuid,
        method: Option<MfaMethod>,
    ) -> Result<Option<ConfigRecord>, AuthError> {
        let query = r"
            SELECT config_id, user_id, method, state, is_primary,
                   sealed_secret, sealed_destination, verified_at, last_used_at, created_at
            FROM mfa_configs
            WHERE user_id = $1
              AND state = 'enabled'
              AND ($2::text IS NULL OR method = $2)
            ORDER BY is_primary DESC, created_at ASC
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(method.map(MfaMethod::as_str))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn enable(&self, config_id: Uuid) -> Result<(), AuthError> {
        let query = r"
            UPDATE mfa_configs
            SET state = 'enabled', verified_at = $2
            WHERE config_id = $1 AND state = 'pending_setup'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(config_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn disable(&self, config_id: Uuid) -> Result<(), AuthError> {
        let query = "UPDATE mfa_configs SET state = 'disabled' WHERE config_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(config_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn touch_last_used(&self, config_id: Uuid) -> Result<(), AuthError> {
        let query = "UPDATE mfa_configs SET last_used_at = $2 WHERE config_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(config_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;

        let query = "DELETE FROM backup_codes WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        let query = r"
            INSERT INTO backup_codes (id, user_id, code_hash, used, created_at)
            VALUES ($1, $2, $3, false, $4)
        ";
        for hash in hashes {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(hash)
                .bind(Utc::now())
                .execute(&mut *tx)
                .instrument(span)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn unused_backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCode>, AuthError> {
        let query = "SELECT id, code_hash FROM backup_codes WHERE user_id = $1 AND used = false";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(rows
            .iter()
            .map(|row| BackupCode {
                id: row.get("id"),
                code_hash: row.get("code_hash"),
            })
            .collect())
    }

    async fn consume_backup_code(&self, id: Uuid) -> Result<bool, AuthError> {
        let query = r"
            UPDATE backup_codes SET used = true, used_at = $2
            WHERE id = $1 AND used = false
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_attempt(&self, attempt: &VerificationAttempt) -> Result<(), AuthError> {
        let query = r"
            INSERT INTO verification_attempts
                (id, user_id, config_id, method, code_hash, success,
                 ip, user_agent, fingerprint, failure_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(attempt.id)
            .bind(attempt.user_id)
            .bind(attempt.config_id)
            .bind(attempt.method)
            .bind(&attempt.code_hash)
            .bind(attempt.success)
            .bind(&attempt.ip)
            .bind(&attempt.user_agent)
            .bind(&attempt.fingerprint)
            .bind(&attempt.failure_reason)
            .bind(attempt.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

/// Process-memory MFA repository with the same consumption semantics.
#[derive(Debug, Default)]
pub struct MemoryMfaRepo {
    inner: tokio::sync::Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    configs: Vec<ConfigRecord>,
    codes: Vec<(Uuid, Uuid, String, bool)>,
    attempts: Vec<VerificationAttempt>,
}

impl MemoryMfaRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded attempts, newest last. For assertions.
    pub async fn attempts(&self) -> Vec<VerificationAttempt> {
        self.inner.lock().await.attempts.clone()
    }
}

#[async_trait]
impl MfaRepo for MemoryMfaRepo {
    async fn insert_config(&self, record: &ConfigRecord) -> Result<(), AuthError> {
        self.inner.lock().await.configs.push(record.clone());
        Ok(())
    }

    async fn config(&self, config_id: Uuid) -> Result<Option<ConfigRecord>, AuthError> {
        Ok(self
            .inner
            .lock()
            .await
            .configs
            .iter()
            .find(|c| c.config_id == config_id)
            .cloned())
    }

    async fn config_for_user(
        &self,
        user_id: Uuid,
        method: Option<MfaMethod>,
    ) -> Result<Option<ConfigRecord>, AuthError> {
        let inner = self.inner.lock().await;
        let mut candidates: Vec<&ConfigRecord> = inner
            .configs
            .iter()
            .filter(|c| {
                c.user_id == user_id
                    && c.state == ConfigState::Enabled
                    && method.is_none_or(|m| c.method == m)
            })
            .collect();
        candidates.sort_by_key(|c| (!c.is_primary, c.created_at));
        Ok(candidates.first().map(|c| (*c).clone()))
    }

    async fn enable(&self, config_id: Uuid) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;
        if let Some(config) = inner
            .configs
            .iter_mut()
            .find(|c| c.config_id == config_id && c.state == ConfigState::PendingSetup)
        {
            config.state = ConfigState::Enabled;
            config.verified_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn disable(&self, config_id: Uuid) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;
        if let Some(config) = inner.configs.iter_mut().find(|c| c.config_id == config_id) {
            config.state = ConfigState::Disabled;
        }
        Ok(())
    }

    async fn touch_last_used(&self, config_id: Uuid) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;
        if let Some(config) = inner.configs.iter_mut().find(|c| c.config_id == config_id) {
            config.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;
        inner.codes.retain(|(_, uid, _, _)| *uid != user_id);
        for hash in hashes {
            inner.codes.push((Uuid::new_v4(), user_id, hash.clone(), false));
        }
        Ok(())
    }

    async fn unused_backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCode>, AuthError> {
        Ok(self
            .inner
            .lock()
            .await
            .codes
            .iter()
            .filter(|(_, uid, _, used)| *uid == user_id && !used)
            .map(|(id, _, hash, _)| BackupCode {
                id: *id,
                code_hash: hash.clone(),
            })
            .collect())
    }

    async fn consume_backup_code(&self, id: Uuid) -> Result<bool, AuthError> {
        let mut inner = self.inner.lock().await;
        if let Some(code) = inner
            .codes
            .iter_mut()
            .find(|(code_id, _, _, used)| *code_id == id && !used)
        {
            code.3 = true;
            return Ok(true);
        }
        Ok(false)
    }

    async fn record_attempt(&self, attempt: &VerificationAttempt) -> Result<(), AuthError> {
        self.inner.lock().await.attempts.push(attempt.clone());
        Ok(())
    }
}
