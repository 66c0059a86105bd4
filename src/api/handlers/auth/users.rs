//! User lookup, password verification, and the failed-attempt lockout.

use crate::error::AuthError;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Failed password attempts before the account locks.
pub const LOCKOUT_THRESHOLD: i32 = 5;
/// How long a lockout lasts.
pub const LOCKOUT_MINUTES: i64 = 15;

/// The slice of the user row the auth surface needs.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub permissions: Vec<String>,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Whether the account is currently locked out.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// User persistence seam for the auth handlers.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError>;

    /// Bump the failed-attempt counter; at the threshold, set the lockout.
    async fn record_login_failure(&self, user_id: Uuid) -> Result<(), AuthError>;

    /// Reset the counter and clear any lockout after a successful login.
    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), AuthError>;
}

/// Constant-work password check against a stored Argon2 hash.
#[must_use]
pub fn verify_password(stored_hash: &str, candidate: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Postgres-backed user repository.
#[derive(Clone)]
pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        let query = r"
            SELECT user_id, email, password_hash, permissions, failed_attempts, locked_until
            FROM users WHERE email = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.map(|row| UserRecord {
            user_id: row.get("user_id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            permissions: row.get("permissions"),
            failed_attempts: row.get("failed_attempts"),
            locked_until: row.get("locked_until"),
        }))
    }

    async fn record_login_failure(&self, user_id: Uuid) -> Result<(), AuthError> {
        let query = r"
            UPDATE users
            SET failed_attempts = failed_attempts + 1,
                locked_until = CASE
                    WHEN failed_attempts + 1 >= $2 THEN $3
                    ELSE locked_until
                END
            WHERE user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(LOCKOUT_THRESHOLD)
            .bind(Utc::now() + Duration::minutes(LOCKOUT_MINUTES))
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), AuthError> {
        let query = r"
            UPDATE users SET failed_attempts = 0, locked_until = NULL
            WHERE user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

/// In-memory user repository for tests.
#[derive(Default)]
pub struct MemoryUserRepo {
    users: std::sync::Mutex<Vec<UserRecord>>,
}

impl MemoryUserRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: UserRecord) {
        if let Ok(mut users) = self.users.lock() {
            users.push(record);
        }
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        let users = self
            .users
            .lock()
            .map_err(|_| AuthError::DependencyUnavailable("user state poisoned".to_string()))?;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn record_login_failure(&self, user_id: Uuid) -> Result<(), AuthError> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| AuthError::DependencyUnavailable("user state poisoned".to_string()))?;
        if let Some(user) = users.iter_mut().find(|u| u.user_id == user_id) {
            user.failed_attempts += 1;
            if user.failed_attempts >= LOCKOUT_THRESHOLD {
                user.locked_until = Some(Utc::now() + Duration::minutes(LOCKOUT_MINUTES));
            }
        }
        Ok(())
    }

    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), AuthError> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| AuthError::DependencyUnavailable("user state poisoned".to_string()))?;
        if let Some(user) = users.iter_mut().find(|u| u.user_id == user_id) {
            user.failed_attempts = 0;
            user.locked_until = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::PasswordHasher;

    pub(crate) fn hash_password(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .expect("argon2 hashing")
            .to_string()
    }

    fn record(email: &str, password: &str) -> UserRecord {
        UserRecord {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: hash_password(password),
            permissions: vec!["accounts:read".to_string()],
            failed_attempts: 0,
            locked_until: None,
        }
    }

    #[test]
    fn password_verification_round_trip() {
        let hash = hash_password("hunter2hunter2");
        assert!(verify_password(&hash, "hunter2hunter2"));
        assert!(!verify_password(&hash, "wrong"));
        assert!(!verify_password("not-a-phc-string", "hunter2hunter2"));
    }

    #[tokio::test]
    async fn fifth_failure_locks_the_account() -> Result<(), AuthError> {
        let repo = MemoryUserRepo::new();
        repo.insert(record("user@example.com", "pw"));
        let user = repo
            .find_by_email("user@example.com")
            .await?
            .ok_or(AuthError::Expired)?;

        for _ in 0..LOCKOUT_THRESHOLD {
            repo.record_login_failure(user.user_id).await?;
        }
        let locked = repo
            .find_by_email("user@example.com")
            .await?
            .ok_or(AuthError::Expired)?;
        assert!(locked.is_locked(Utc::now()));

        repo.clear_lockout(user.user_id).await?;
        let cleared = repo
            .find_by_email("user@example.com")
            .await?
            .ok_or(AuthError::Expired)?;
        assert!(!cleared.is_locked(Utc::now()));
        assert_eq!(cleared.failed_attempts, 0);
        Ok(())
    }
}
