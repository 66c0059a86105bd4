//! HTTP server wiring: dependency assembly, middleware stack, and graceful
//! shutdown.

use crate::api::handlers::{auth, root};
use crate::crypto::derive_key;
use crate::mfa::{LogCodeSender, MfaService, MfaSettings, PgMfaRepo};
use crate::risk::{GeoProvider, HttpGeoProvider, NullGeoProvider, RiskConfig, RiskEngine, RiskRepo};
use crate::session::{PgSessionIndex, SessionBlobs, SessionConfig, SessionService};
use crate::store::{RedisStore, TtlStore};
use crate::token::{TokenConfig, TokenService};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::get,
    Extension,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the server needs, parsed and validated by the CLI.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub redis_url: String,
    pub issuer: String,
    pub audience: String,
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub encryption_secret: SecretString,
    /// IP intelligence endpoint; unset disables geo signals.
    pub geo_url: Option<Url>,
    pub max_sessions: usize,
    pub session_ttl_seconds: u64,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: ServerConfig) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    let store: Arc<dyn TtlStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("Failed to connect to cache store")?,
    );

    let tokens = TokenService::new(
        TokenConfig::new(
            config.issuer.clone(),
            config.audience.clone(),
            config.access_secret.clone(),
            config.refresh_secret.clone(),
        ),
        store.clone(),
    )
    .context("Invalid token configuration")?;

    let encryption_key = derive_key(config.encryption_secret.expose_secret().as_bytes());
    let session_config = SessionConfig::default()
        .with_max_sessions(config.max_sessions)
        .with_session_ttl_seconds(config.session_ttl_seconds);
    let blobs = SessionBlobs::new(
        store.clone(),
        encryption_key,
        session_config.session_ttl(),
    );
    let sessions = SessionService::new(
        session_config,
        blobs,
        Arc::new(PgSessionIndex::new(pool.clone())),
        store.clone(),
    );

    let geo: Arc<dyn GeoProvider> = match config.geo_url.clone() {
        Some(url) => Arc::new(HttpGeoProvider::new(url).context("Invalid geo endpoint")?),
        None => Arc::new(NullGeoProvider),
    };
    let risk = RiskEngine::new(
        RiskConfig::default(),
        store.clone(),
        geo,
        Some(Arc::new(RiskRepo::new(pool.clone()))),
    );

    let mfa = MfaService::new(
        MfaSettings::new(config.issuer.clone()),
        Arc::new(PgMfaRepo::new(pool.clone())),
        store.clone(),
        risk.clone(),
        Arc::new(LogCodeSender),
        encryption_key,
    );

    let state = Arc::new(auth::AuthState {
        tokens,
        sessions,
        mfa,
        risk,
        users: Arc::new(auth::PgUserRepo::new(pool.clone())),
        store,
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like `/` and the swagger UI.
    let (router, api) = router().split_for_parts();
    let app = router
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", api))
        .route("/", get(root::root))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state))
                .layer(Extension(pool.clone())),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            rx.recv().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
