//! Session persistence: sealed cache blobs plus a relational index.
//!
//! The cache blob is the source of truth for validation (it expires with the
//! session); the relational index exists for the concurrent-session cap and
//! admin-style bulk revocation, where eviction and creation must commit as one
//! unit.

use super::models::{Session, SessionStatus};
use crate::crypto::{open, seal};
use crate::error::AuthError;
use crate::store::TtlStore;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

fn blob_key(session_id: Uuid) -> String {
    format!("session:{session_id}")
}

fn blob_aad(session_id: Uuid) -> String {
    format!("session:v1|{session_id}")
}

/// Sealed session blobs in the TTL store.
///
/// Payloads are encrypted before they touch the cache; the AAD binds each blob
/// to its session id so a blob cannot be replayed under another handle.
#[derive(Clone)]
pub struct SessionBlobs {
    cache: Arc<dyn TtlStore>,
    key: [u8; 32],
    ttl: Duration,
}

impl SessionBlobs {
    #[must_use]
    pub fn new(cache: Arc<dyn TtlStore>, key: [u8; 32], ttl: Duration) -> Self {
        Self { cache, key, ttl }
    }

    /// Seal and write a session, refreshing its TTL.
    ///
    /// # Errors
    /// Returns an error if sealing or the cache write fails.
    pub async fn put(&self, session: &Session) -> Result<(), AuthError> {
        let plaintext = serde_json::to_vec(session)
            .map_err(|e| AuthError::Configuration(format!("session serialization: {e}")))?;
        let sealed = seal(&self.key, &plaintext, blob_aad(session.session_id).as_bytes())
            .map_err(|e| AuthError::Configuration(format!("session sealing: {e}")))?;
        self.cache
            .set(&blob_key(session.session_id), &BASE64.encode(sealed), Some(self.ttl))
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))
    }

    /// Read and open a session blob. A missing key means the session expired.
    ///
    /// # Errors
    /// Returns an error if the cache read fails or the blob will not open
    /// under its own AAD.
    pub async fn get(&self, session_id: Uuid) -> Result<Option<Session>, AuthError> {
        let Some(encoded) = self
            .cache
            .get(&blob_key(session_id))
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?
        else {
            return Ok(None);
        };

        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| AuthError::AuthenticationFailed(format!("corrupt session blob: {e}")))?;
        let plaintext = open(&self.key, &sealed, blob_aad(session_id).as_bytes())
            .map_err(|e| AuthError::AuthenticationFailed(format!("corrupt session blob: {e}")))?;
        let session = serde_json::from_slice(&plaintext)
            .map_err(|e| AuthError::AuthenticationFailed(format!("corrupt session blob: {e}")))?;
        Ok(Some(session))
    }

    /// Drop a blob. Idempotent.
    ///
    /// # Errors
    /// Returns an error if the cache delete fails.
    pub async fn remove(&self, session_id: Uuid) -> Result<(), AuthError> {
        self.cache
            .delete(&blob_key(session_id))
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))
    }
}

/// Relational index over active sessions.
///
/// [`PgSessionIndex`] is the production implementation; [`MemoryIndex`] backs
/// tests and local development.
#[async_trait]
pub trait SessionIndex: Send + Sync {
    /// Insert a session row, evicting least-recently-used active rows so the
    /// user stays at or under `cap`. Eviction and insertion commit as one
    /// unit. Returns the evicted session ids.
    async fn insert_with_cap(&self, session: &Session, cap: usize) -> Result<Vec<Uuid>, AuthError>;

    /// Best-effort activity bump.
    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Move a session out of `active`.
    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), AuthError>;

    /// Revoke every active session for a user. Returns the affected ids.
    async fn revoke_all(&self, user_id: Uuid) -> Result<Vec<Uuid>, AuthError>;

    /// Re-key a row under a fresh session handle.
    async fn rename(&self, old_id: Uuid, new_id: Uuid) -> Result<(), AuthError>;
}

/// Postgres-backed session index.
#[derive(Clone)]
pub struct PgSessionIndex {
    pool: PgPool,
}

impl PgSessionIndex {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionIndex for PgSessionIndex {
    async fn insert_with_cap(&self, session: &Session, cap: usize) -> Result<Vec<Uuid>, AuthError> {
        let mut tx = self.pool.begin().await?;

        // Lock the user's active rows so concurrent logins serialize on the cap.
        let query = r"
            SELECT session_id FROM sessions
            WHERE user_id = $1 AND status = 'active'
            ORDER BY last_accessed_at ASC
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(session.user_id)
            .fetch_all(&mut *tx)
            .instrument(span)
            .await?;
        let active: Vec<Uuid> = rows.iter().map(|row| row.get("session_id")).collect();

        let evicted: Vec<Uuid> = if active.len() >= cap {
            active
                .iter()
                .take(active.len() + 1 - cap)
                .copied()
                .collect()
        } else {
            Vec::new()
        };

        if !evicted.is_empty() {
            let query = "UPDATE sessions SET status = 'revoked' WHERE session_id = ANY($1)";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(&evicted)
                .execute(&mut *tx)
                .instrument(span)
                .await?;
        }

        let query = r"
            INSERT INTO sessions
                (session_id, user_id, status, created_at, last_accessed_at)
            VALUES ($1, $2, 'active', $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session.session_id)
            .bind(session.user_id)
            .bind(session.created_at)
            .bind(session.last_accessed_at)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        tx.commit().await?;
        Ok(evicted)
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        let query = "UPDATE sessions SET last_accessed_at = $2 WHERE session_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_id)
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), AuthError> {
        let query = "UPDATE sessions SET status = $2 WHERE session_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<Vec<Uuid>, AuthError> {
        let query = r"
            UPDATE sessions SET status = 'revoked'
            WHERE user_id = $1 AND status = 'active'
            RETURNING session_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(rows.iter().map(|row| row.get("session_id")).collect())
    }

    async fn rename(&self, old_id: Uuid, new_id: Uuid) -> Result<(), AuthError> {
        let query = "UPDATE sessions SET session_id = $2 WHERE session_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(old_id)
            .bind(new_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

/// Process-memory session index, same cap semantics as [`PgSessionIndex`].
#[derive(Debug, Default)]
pub struct MemoryIndex {
    rows: tokio::sync::Mutex<std::collections::HashMap<Uuid, IndexRow>>,
}

#[derive(Clone, Debug)]
struct IndexRow {
    user_id: Uuid,
    status: SessionStatus,
    last_accessed_at: DateTime<Utc>,
}

impl MemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionIndex for MemoryIndex {
    async fn insert_with_cap(&self, session: &Session, cap: usize) -> Result<Vec<Uuid>, AuthError> {
        let mut rows = self.rows.lock().await;

        let mut active: Vec<(Uuid, DateTime<Utc>)> = rows
            .iter()
            .filter(|(_, row)| row.user_id == session.user_id && row.status == SessionStatus::Active)
            .map(|(id, row)| (*id, row.last_accessed_at))
            .collect();
        active.sort_by_key(|(_, at)| *at);

        let evicted: Vec<Uuid> = if active.len() >= cap {
            active
                .iter()
                .take(active.len() + 1 - cap)
                .map(|(id, _)| *id)
                .collect()
        } else {
            Vec::new()
        };
        for id in &evicted {
            if let Some(row) = rows.get_mut(id) {
                row.status = SessionStatus::Revoked;
            }
        }

        rows.insert(
            session.session_id,
            IndexRow {
                user_id: session.user_id,
                status: SessionStatus::Active,
                last_accessed_at: session.last_accessed_at,
            },
        );
        Ok(evicted)
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(row) = self.rows.lock().await.get_mut(&session_id) {
            row.last_accessed_at = at;
        }
        Ok(())
    }

    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), AuthError> {
        if let Some(row) = self.rows.lock().await.get_mut(&session_id) {
            row.status = status;
        }
        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<Vec<Uuid>, AuthError> {
        let mut rows = self.rows.lock().await;
        let mut revoked = Vec::new();
        for (id, row) in rows.iter_mut() {
            if row.user_id == user_id && row.status == SessionStatus::Active {
                row.status = SessionStatus::Revoked;
                revoked.push(*id);
            }
        }
        Ok(revoked)
    }

    async fn rename(&self, old_id: Uuid, new_id: Uuid) -> Result<(), AuthError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.remove(&old_id) {
            rows.insert(new_id, row);
        }
        Ok(())
    }
}
