//! Write-once audit trail of scored security events.

use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

/// One scored event. Inserted once, never mutated.
#[derive(Clone, Debug)]
pub struct RiskEvent {
    pub id: Uuid,
    pub kind: String,
    pub user_id: Option<Uuid>,
    pub ip: String,
    pub user_agent: String,
    pub score: i16,
    pub factors: Vec<String>,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
}

/// Audit sink seam. Appends are write-once; callers treat the trail as
/// best-effort and must not block authentication on it.
#[async_trait]
pub trait RiskAudit: Send + Sync {
    async fn insert_event(&self, event: &RiskEvent) -> Result<(), AuthError>;
}

/// Postgres sink for risk events.
#[derive(Clone)]
pub struct RiskRepo {
    pool: PgPool,
}

impl RiskRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RiskAudit for RiskRepo {
    async fn insert_event(&self, event: &RiskEvent) -> Result<(), AuthError> {
        let query = r"
            INSERT INTO risk_events
                (id, kind, user_id, ip, user_agent, score, factors, blocked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(event.id)
            .bind(&event.kind)
            .bind(event.user_id)
            .bind(&event.ip)
            .bind(&event.user_agent)
            .bind(event.score)
            .bind(serde_json::json!(event.factors))
            .bind(event.blocked)
            .bind(event.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

/// In-memory audit sink for tests.
#[derive(Default)]
pub struct MemoryRiskAudit {
    events: std::sync::Mutex<Vec<RiskEvent>>,
}

impl MemoryRiskAudit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<RiskEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RiskAudit for MemoryRiskAudit {
    async fn insert_event(&self, event: &RiskEvent) -> Result<(), AuthError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| AuthError::DependencyUnavailable("audit state poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}
