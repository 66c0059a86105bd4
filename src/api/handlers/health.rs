//! Health probe: database and cache-aware status with a detailed JSON payload.

use super::auth::AuthState;
use crate::GIT_COMMIT_HASH;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{error, info_span, warn, Instrument};
use utoipa::ToSchema;

const HEALTH_PROBE_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    cache: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "All dependencies are healthy", body = Health),
        (status = 503, description = "A dependency is unhealthy", body = Health),
    ),
    tag = "health",
)]
/// Perform a detailed health check.
pub async fn health(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let db_healthy = database_probe(&pool.0).await;
    let cache_healthy = cache_probe(&state).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status_str(db_healthy),
        cache: status_str(cache_healthy),
    };

    let status = if db_healthy && cache_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

fn status_str(healthy: bool) -> String {
    if healthy { "ok" } else { "error" }.to_string()
}

/// Ping the database within the probe deadline.
async fn database_probe(pool: &PgPool) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let probe = async {
        match pool.acquire().instrument(acquire_span).await {
            Ok(mut conn) => {
                let ping_span =
                    info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
                match conn.ping().instrument(ping_span).await {
                    Ok(()) => true,
                    Err(error) => {
                        error!("Failed to ping database: {}", error);
                        false
                    }
                }
            }
            Err(error) => {
                error!("Failed to acquire database connection: {}", error);
                false
            }
        }
    };

    match timeout(Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECONDS), probe).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Database health check timed out");
            false
        }
    }
}

/// Read a throwaway key from the cache store within the probe deadline.
async fn cache_probe(state: &AuthState) -> bool {
    let probe = state.store.get("health:probe");
    match timeout(Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECONDS), probe).await {
        Ok(Ok(_)) => true,
        Ok(Err(error)) => {
            error!("Cache store probe failed: {}", error);
            false
        }
        Err(_) => {
            warn!("Cache store health check timed out");
            false
        }
    }
}
