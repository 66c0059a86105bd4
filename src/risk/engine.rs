//! Risk scoring and decision policy.
//!
//! The engine aggregates independent signal categories into a 0 to 100 score
//! and a decision. Every signal source degrades gracefully: an unreachable
//! store or provider contributes zero points with a logged warning, so the
//! engine is never a single point of total failure for login. The one
//! exception is [`RiskEngine::rate_gate`], which fails closed on a store
//! outage: an unavailable counter must not mean unlimited attempts.

use super::geo::{haversine_km, GeoProvider, IpIntel};
use super::patterns::{
    account_enumeration, automated_timing, credential_stuffing, AttemptSample,
    DETECTION_WINDOW_SECS,
};
use super::repo::{RiskAudit, RiskEvent};
use super::signals::{
    score_device, score_ip, score_temporal, score_user, IpActivity, Signal, SignalScore,
    TravelCheck,
};
use crate::error::{AuthError, SecurityAlert};
use crate::store::TtlStore;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_BLOCK_THRESHOLD: u32 = 90;
const DEFAULT_HIGH_THRESHOLD: u32 = 70;
const DEFAULT_MEDIUM_THRESHOLD: u32 = 40;
const DEFAULT_RATE_LIMIT_MAX: i64 = 10;
const SEEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const GEO_DEADLINE: Duration = Duration::from_millis(300);
const ATTEMPT_LOG_CAP: usize = 50;

const W_CREDENTIAL_STUFFING: u32 = 50;
const W_ACCOUNT_ENUMERATION: u32 = 40;
const W_AUTOMATED_TIMING: u32 = 30;

/// Score stamped on alert-driven audit rows. Above the block threshold:
/// a confirmed reuse or hijack signal outranks any inferred score.
const ALERT_SCORE: u8 = 95;

/// Which flow asked for the assessment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RiskEventKind {
    Login,
    MfaAttempt,
    Refresh,
    /// Session revalidation on an already-issued credential.
    Session,
}

impl RiskEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::MfaAttempt => "mfa_attempt",
            Self::Refresh => "refresh",
            Self::Session => "session",
        }
    }
}

/// Everything the engine knows about the request under assessment.
#[derive(Clone, Debug)]
pub struct EventContext {
    pub user_id: Option<Uuid>,
    pub ip: String,
    pub user_agent: String,
    pub fingerprint: Option<String>,
    /// Lockout state from the user record, when the caller already has it.
    pub user_locked: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// The scored outcome driving allow / challenge / block.
#[derive(Clone, Debug)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
    pub factors: Vec<String>,
    pub blocked: bool,
}

impl RiskAssessment {
    /// Whether the caller should demand an MFA challenge.
    #[must_use]
    pub fn requires_challenge(&self) -> bool {
        matches!(self.level, RiskLevel::High | RiskLevel::Critical)
    }
}

/// Scoring thresholds and counter windows.
#[derive(Clone, Debug)]
pub struct RiskConfig {
    block_threshold: u32,
    high_threshold: u32,
    medium_threshold: u32,
    window: Duration,
    rate_limit_max: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            medium_threshold: DEFAULT_MEDIUM_THRESHOLD,
            window: Duration::from_secs(DETECTION_WINDOW_SECS.unsigned_abs()),
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
        }
    }
}

impl RiskConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_block_threshold(mut self, threshold: u32) -> Self {
        self.block_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_rate_limit_max(mut self, max: i64) -> Self {
        self.rate_limit_max = max;
        self
    }
}

/// Last successful authentication location, for the travel heuristic.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct LastLocation {
    ip: String,
    latitude: f64,
    longitude: f64,
    at: DateTime<Utc>,
}

/// Multi-signal risk engine over injected store, provider, and audit sink.
#[derive(Clone)]
pub struct RiskEngine {
    config: RiskConfig,
    store: Arc<dyn TtlStore>,
    geo: Arc<dyn GeoProvider>,
    repo: Option<Arc<dyn RiskAudit>>,
}

fn ip_fail_key(ip: &str) -> String {
    format!("fail:ip:{ip}")
}

fn ip_velocity_key(ip: &str) -> String {
    format!("vel:ip:{ip}")
}

fn ip_users_key(ip: &str) -> String {
    format!("users:ip:{ip}")
}

fn ip_attempts_key(ip: &str) -> String {
    format!("attempts:ip:{ip}")
}

fn ip_block_key(ip: &str) -> String {
    format!("block:ip:{ip}")
}

fn user_fail_key(user_id: Uuid) -> String {
    format!("fail:user:{user_id}")
}

fn seen_ip_key(user_id: Uuid, ip: &str) -> String {
    format!("seen:ip:{user_id}:{ip}")
}

fn seen_fp_key(user_id: Uuid, fingerprint: &str) -> String {
    format!("seen:fp:{user_id}:{fingerprint}")
}

fn user_hours_key(user_id: Uuid) -> String {
    format!("hours:user:{user_id}")
}

fn user_location_key(user_id: Uuid) -> String {
    format!("loc:user:{user_id}")
}

fn rate_key(scope: &str) -> String {
    format!("rl:{scope}")
}

impl RiskEngine {
    #[must_use]
    pub fn new(
        config: RiskConfig,
        store: Arc<dyn TtlStore>,
        geo: Arc<dyn GeoProvider>,
        repo: Option<Arc<dyn RiskAudit>>,
    ) -> Self {
        Self {
            config,
            store,
            geo,
            repo,
        }
    }

    /// Score an event and decide allow / challenge / block.
    ///
    /// Never fails: unavailable signal sources contribute zero points. The
    /// assessment is appended to the audit trail best-effort.
    pub async fn assess(&self, kind: RiskEventKind, context: &EventContext) -> RiskAssessment {
        let now = Utc::now();
        let intel = self.lookup_intel(&context.ip).await;

        let mut points: u32 = 0;
        let mut factors: Vec<String> = Vec::new();
        let signals = [
            ("ip", self.ip_signal(context, &intel).await),
            ("user", self.user_signal(context).await),
            ("temporal", self.temporal_signal(context, &intel, now).await),
            ("device", self.device_signal(context).await),
        ];
        for (name, signal) in signals {
            match signal {
                Signal::Scored(score) => {
                    points += score.points;
                    factors.extend(score.factors);
                }
                Signal::Unavailable { source } => {
                    warn!("{name} signal unavailable ({source}), scoring zero");
                }
            }
        }

        let mut force_block = false;
        match self.pattern_points(&context.ip, now).await {
            Ok((pattern_points, pattern_factors, stuffing)) => {
                points += pattern_points;
                factors.extend(pattern_factors);
                if stuffing {
                    force_block = true;
                    // Further attempts from this IP stay blocked for the window.
                    if let Err(e) = self
                        .store
                        .set(&ip_block_key(&context.ip), "1", Some(self.config.window))
                        .await
                    {
                        warn!("failed to persist ip block for {}: {e}", context.ip);
                    }
                }
            }
            Err(source) => warn!("pattern signal unavailable ({source}), scoring zero"),
        }

        let already_blocked = matches!(
            self.store.get(&ip_block_key(&context.ip)).await,
            Ok(Some(_))
        );

        let score = points.min(100);
        let blocked = force_block || already_blocked || score >= self.config.block_threshold;
        let level = if blocked || score >= self.config.block_threshold {
            RiskLevel::Critical
        } else if score >= self.config.high_threshold {
            RiskLevel::High
        } else if score >= self.config.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let assessment = RiskAssessment {
            score: u8::try_from(score).unwrap_or(100),
            level,
            factors,
            blocked,
        };
        self.audit(kind, context, &assessment, now).await;
        assessment
    }

    /// Adaptive rate-limit gate, checked before any credential or code
    /// verification. Fails closed: an unreachable counter denies the attempt.
    ///
    /// # Errors
    /// Returns [`SecurityAlert::RateLimited`] when the caller is over budget
    /// or its IP is blocked, and [`AuthError::DependencyUnavailable`] when the
    /// counter store cannot answer.
    pub async fn rate_gate(&self, scope: &str, ip: &str) -> Result<(), AuthError> {
        let blocked = self
            .store
            .get(&ip_block_key(ip))
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?;
        if blocked.is_some() {
            return Err(SecurityAlert::RateLimited.into());
        }

        let count = self
            .store
            .incr(&rate_key(scope), self.config.window)
            .await
            .map_err(|e| AuthError::DependencyUnavailable(e.to_string()))?;
        if count > self.config.rate_limit_max {
            return Err(SecurityAlert::RateLimited.into());
        }
        Ok(())
    }

    /// Record a detected security alert in the audit trail: token reuse,
    /// session hijack signals, and their kin. The caller has already denied
    /// the request; this bumps the failure counters and lands a blocked,
    /// above-threshold event so the denial is never silent. Best-effort.
    pub async fn record_alert(
        &self,
        kind: RiskEventKind,
        context: &EventContext,
        alert: SecurityAlert,
    ) {
        self.record_failure(context).await;
        let assessment = RiskAssessment {
            score: ALERT_SCORE,
            level: RiskLevel::Critical,
            factors: vec![alert.as_str().to_string()],
            blocked: true,
        };
        self.audit(kind, context, &assessment, Utc::now()).await;
    }

    /// Record a failed attempt. Best-effort: counter outages are logged, not
    /// propagated, because recording must never mask the original failure.
    pub async fn record_failure(&self, context: &EventContext) {
        let window = self.config.window;
        if let Err(e) = self.store.incr(&ip_fail_key(&context.ip), window).await {
            warn!("failed to bump ip failure counter: {e}");
        }
        if let Err(e) = self.store.incr(&ip_velocity_key(&context.ip), window).await {
            warn!("failed to bump ip velocity counter: {e}");
        }
        if let Some(user_id) = context.user_id {
            if let Err(e) = self.store.incr(&user_fail_key(user_id), window).await {
                warn!("failed to bump user failure counter: {e}");
            }
            if let Err(e) = self
                .store
                .sadd(&ip_users_key(&context.ip), &user_id.to_string(), window)
                .await
            {
                warn!("failed to record user for ip: {e}");
            }
        }
        self.append_attempt(context, false).await;
    }

    /// Record a successful authentication: velocity, attempt log, seen-device
    /// markers, access-hour histogram, and the location used by the travel
    /// heuristic. Best-effort.
    pub async fn record_success(&self, context: &EventContext) {
        let window = self.config.window;
        if let Err(e) = self.store.incr(&ip_velocity_key(&context.ip), window).await {
            warn!("failed to bump ip velocity counter: {e}");
        }
        self.append_attempt(context, true).await;

        let Some(user_id) = context.user_id else {
            return;
        };

        if let Err(e) = self
            .store
            .set(&seen_ip_key(user_id, &context.ip), "1", Some(SEEN_TTL))
            .await
        {
            warn!("failed to mark ip as seen: {e}");
        }
        if let Some(fingerprint) = &context.fingerprint {
            if let Err(e) = self
                .store
                .set(&seen_fp_key(user_id, fingerprint), "1", Some(SEEN_TTL))
                .await
            {
                warn!("failed to mark fingerprint as seen: {e}");
            }
        }

        let now = Utc::now();
        self.bump_hour_histogram(user_id, now).await;

        let intel = self.lookup_intel(&context.ip).await;
        if let (Some(latitude), Some(longitude)) = (intel.latitude, intel.longitude) {
            let location = LastLocation {
                ip: context.ip.clone(),
                latitude,
                longitude,
                at: now,
            };
            match serde_json::to_string(&location) {
                Ok(json) => {
                    if let Err(e) = self
                        .store
                        .set(&user_location_key(user_id), &json, Some(SEEN_TTL))
                        .await
                    {
                        warn!("failed to record auth location: {e}");
                    }
                }
                Err(e) => warn!("failed to encode auth location: {e}"),
            }
        }
    }

    async fn lookup_intel(&self, ip: &str) -> IpIntel {
        match tokio::time::timeout(GEO_DEADLINE, self.geo.lookup(ip)).await {
            Ok(Ok(intel)) => intel,
            Ok(Err(e)) => {
                warn!("reputation lookup failed for {ip}: {e}");
                IpIntel::default()
            }
            Err(_) => {
                warn!("reputation lookup timed out for {ip}");
                IpIntel::default()
            }
        }
    }

    async fn ip_signal(&self, context: &EventContext, intel: &IpIntel) -> Signal {
        let failed = self.store.get(&ip_fail_key(&context.ip)).await;
        let velocity = self.store.get(&ip_velocity_key(&context.ip)).await;
        let distinct = self.store.scard(&ip_users_key(&context.ip)).await;

        let (Ok(failed), Ok(velocity), Ok(distinct)) = (failed, velocity, distinct) else {
            return Signal::Unavailable {
                source: "ip activity counters",
            };
        };

        let activity = IpActivity {
            failed_attempts: failed.and_then(|v| v.parse().ok()).unwrap_or(0),
            request_velocity: velocity.and_then(|v| v.parse().ok()).unwrap_or(0),
            distinct_users: distinct,
        };
        Signal::Scored(score_ip(activity, intel))
    }

    async fn user_signal(&self, context: &EventContext) -> Signal {
        let Some(user_id) = context.user_id else {
            return Signal::Scored(SignalScore::default());
        };

        let failures = self.store.get(&user_fail_key(user_id)).await;
        let seen = self.store.get(&seen_ip_key(user_id, &context.ip)).await;
        let (Ok(failures), Ok(seen)) = (failures, seen) else {
            return Signal::Unavailable {
                source: "user history",
            };
        };

        Signal::Scored(score_user(
            failures.and_then(|v| v.parse().ok()).unwrap_or(0),
            seen.is_none(),
            context.user_locked,
        ))
    }

    async fn temporal_signal(
        &self,
        context: &EventContext,
        intel: &IpIntel,
        now: DateTime<Utc>,
    ) -> Signal {
        let Some(user_id) = context.user_id else {
            return Signal::Scored(SignalScore::default());
        };

        let histogram = match self.store.get(&user_hours_key(user_id)).await {
            Ok(Some(json)) => serde_json::from_str::<[u32; 24]>(&json).unwrap_or([0; 24]),
            Ok(None) => [0; 24],
            Err(_) => {
                return Signal::Unavailable {
                    source: "access history",
                }
            }
        };

        let travel = match self.store.get(&user_location_key(user_id)).await {
            Ok(Some(json)) => serde_json::from_str::<LastLocation>(&json)
                .ok()
                .filter(|last| last.ip != context.ip)
                .and_then(|last| {
                    let (latitude, longitude) = (intel.latitude?, intel.longitude?);
                    Some(TravelCheck {
                        distance_km: haversine_km(
                            last.latitude,
                            last.longitude,
                            latitude,
                            longitude,
                        ),
                        elapsed_secs: (now - last.at).num_seconds(),
                    })
                }),
            Ok(None) => None,
            Err(_) => {
                return Signal::Unavailable {
                    source: "access history",
                }
            }
        };

        Signal::Scored(score_temporal(
            &histogram,
            now.hour() as usize,
            travel,
        ))
    }

    async fn device_signal(&self, context: &EventContext) -> Signal {
        let unseen = match (&context.fingerprint, context.user_id) {
            (Some(fingerprint), Some(user_id)) => {
                match self.store.get(&seen_fp_key(user_id, fingerprint)).await {
                    Ok(seen) => seen.is_none(),
                    Err(_) => {
                        return Signal::Unavailable {
                            source: "device history",
                        }
                    }
                }
            }
            _ => false,
        };
        Signal::Scored(score_device(unseen, &context.user_agent))
    }

    async fn pattern_points(
        &self,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<(u32, Vec<String>, bool), &'static str> {
        let attempts = match self.store.get(&ip_attempts_key(ip)).await {
            Ok(Some(json)) => serde_json::from_str::<Vec<AttemptSample>>(&json).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(_) => return Err("attempt log"),
        };

        let mut points = 0;
        let mut factors = Vec::new();
        let stuffing = credential_stuffing(&attempts, now);
        if stuffing {
            points += W_CREDENTIAL_STUFFING;
            factors.push("credential_stuffing".to_string());
        }
        if account_enumeration(&attempts, now) {
            points += W_ACCOUNT_ENUMERATION;
            factors.push("account_enumeration".to_string());
        }
        if automated_timing(&attempts, now) {
            points += W_AUTOMATED_TIMING;
            factors.push("automated_timing".to_string());
        }
        Ok((points, factors, stuffing))
    }

    async fn append_attempt(&self, context: &EventContext, success: bool) {
        let key = ip_attempts_key(&context.ip);
        let mut attempts = match self.store.get(&key).await {
            Ok(Some(json)) => serde_json::from_str::<Vec<AttemptSample>>(&json).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("failed to read attempt log: {e}");
                return;
            }
        };

        attempts.push(AttemptSample {
            user_id: context.user_id,
            success,
            at: Utc::now(),
        });
        if attempts.len() > ATTEMPT_LOG_CAP {
            let excess = attempts.len() - ATTEMPT_LOG_CAP;
            attempts.drain(..excess);
        }

        match serde_json::to_string(&attempts) {
            Ok(json) => {
                if let Err(e) = self.store.set(&key, &json, Some(self.config.window * 2)).await {
                    warn!("failed to persist attempt log: {e}");
                }
            }
            Err(e) => warn!("failed to encode attempt log: {e}"),
        }
    }

    async fn bump_hour_histogram(&self, user_id: Uuid, now: DateTime<Utc>) {
        let key = user_hours_key(user_id);
        let mut histogram = match self.store.get(&key).await {
            Ok(Some(json)) => serde_json::from_str::<[u32; 24]>(&json).unwrap_or([0; 24]),
            Ok(None) => [0; 24],
            Err(e) => {
                warn!("failed to read access-hour histogram: {e}");
                return;
            }
        };
        if let Some(slot) = histogram.get_mut(now.hour() as usize) {
            *slot = slot.saturating_add(1);
        }

        match serde_json::to_string(&histogram) {
            Ok(json) => {
                if let Err(e) = self.store.set(&key, &json, Some(SEEN_TTL)).await {
                    warn!("failed to persist access-hour histogram: {e}");
                }
            }
            Err(e) => warn!("failed to encode access-hour histogram: {e}"),
        }
    }

    async fn audit(
        &self,
        kind: RiskEventKind,
        context: &EventContext,
        assessment: &RiskAssessment,
        now: DateTime<Utc>,
    ) {
        tracing::info!(
            kind = kind.as_str(),
            ip = %context.ip,
            score = assessment.score,
            blocked = assessment.blocked,
            factors = ?assessment.factors,
            "risk assessment"
        );
        let Some(repo) = &self.repo else {
            return;
        };
        let event = RiskEvent {
            id: Uuid::new_v4(),
            kind: kind.as_str().to_string(),
            user_id: context.user_id,
            ip: context.ip.clone(),
            user_agent: context.user_agent.clone(),
            score: i16::from(assessment.score),
            factors: assessment.factors.clone(),
            blocked: assessment.blocked,
            created_at: now,
        };
        if let Err(e) = repo.insert_event(&event).await {
            warn!("failed to append risk event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::geo::NullGeoProvider;
    use crate::risk::repo::MemoryRiskAudit;
    use crate::store::{MemoryStore, StoreError};
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;

    struct StaticGeoProvider;

    #[async_trait]
    impl GeoProvider for StaticGeoProvider {
        async fn lookup(&self, ip: &str) -> AnyResult<IpIntel> {
            // London and New York, roughly 5,570 km apart.
            let (latitude, longitude) = match ip {
                "203.0.113.7" => (51.5074, -0.1278),
                "198.51.100.20" => (40.7128, -74.0060),
                _ => return Ok(IpIntel::default()),
            };
            Ok(IpIntel {
                latitude: Some(latitude),
                longitude: Some(longitude),
                ..IpIntel::default()
            })
        }
    }

    /// Store whose every call fails, for the fail-closed path.
    struct DownStore;

    #[async_trait]
    impl crate::store::TtlStore for DownStore {
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set_nx(&self, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn take(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn incr(&self, _: &str, _: Duration) -> Result<i64, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn sadd(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn scard(&self, _: &str) -> Result<i64, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    fn engine(store: Arc<dyn TtlStore>, geo: Arc<dyn GeoProvider>) -> RiskEngine {
        RiskEngine::new(RiskConfig::default(), store, geo, None)
    }

    fn context(ip: &str, user_id: Option<Uuid>) -> EventContext {
        EventContext {
            user_id,
            ip: ip.to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            fingerprint: Some("fp-1".to_string()),
            user_locked: false,
        }
    }

    #[tokio::test]
    async fn clean_history_scores_low_after_a_success() {
        let engine = engine(Arc::new(MemoryStore::new()), Arc::new(NullGeoProvider));
        let user = Uuid::new_v4();
        let ctx = context("203.0.113.7", Some(user));

        engine.record_success(&ctx).await;
        let assessment = engine.assess(RiskEventKind::Login, &ctx).await;
        assert_eq!(assessment.level, RiskLevel::Low);
        assert!(!assessment.blocked);
    }

    #[tokio::test]
    async fn recorded_failures_raise_the_score_monotonically() {
        let engine = engine(Arc::new(MemoryStore::new()), Arc::new(NullGeoProvider));
        let user = Uuid::new_v4();
        let ctx = context("203.0.113.7", Some(user));

        let before = engine.assess(RiskEventKind::Login, &ctx).await.score;
        for _ in 0..6 {
            engine.record_failure(&ctx).await;
        }
        let after = engine.assess(RiskEventKind::Login, &ctx).await.score;
        assert!(after > before, "{after} should exceed {before}");
    }

    #[tokio::test]
    async fn impossible_travel_is_flagged_and_weighted() {
        let engine = engine(Arc::new(MemoryStore::new()), Arc::new(StaticGeoProvider));
        let user = Uuid::new_v4();

        // Successful login from London, then a request from New York minutes
        // later with no intermediate login.
        engine.record_success(&context("203.0.113.7", Some(user))).await;
        let assessment = engine
            .assess(RiskEventKind::Login, &context("198.51.100.20", Some(user)))
            .await;

        assert!(assessment
            .factors
            .contains(&"impossible_travel".to_string()));
        assert!(assessment.score >= 35);
    }

    #[tokio::test]
    async fn credential_stuffing_blocks_the_ip() {
        let engine = engine(Arc::new(MemoryStore::new()), Arc::new(NullGeoProvider));
        let ip = "203.0.113.7";

        // 20 failures across 5 distinct accounts within the window.
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for i in 0..20 {
            engine.record_failure(&context(ip, Some(users[i % 5]))).await;
        }

        let assessment = engine
            .assess(RiskEventKind::Login, &context(ip, None))
            .await;
        assert!(assessment.blocked);
        assert!(assessment
            .factors
            .contains(&"credential_stuffing".to_string()));

        // Further attempts from the IP hit the gate.
        let gate = engine.rate_gate("login:stuffing-test", ip).await;
        assert!(matches!(
            gate,
            Err(AuthError::Security(SecurityAlert::RateLimited))
        ));
    }

    #[tokio::test]
    async fn rate_gate_enforces_the_budget() {
        let engine = engine(Arc::new(MemoryStore::new()), Arc::new(NullGeoProvider));
        for _ in 0..10 {
            engine.rate_gate("mfa:user-1", "203.0.113.7").await.unwrap();
        }
        let over = engine.rate_gate("mfa:user-1", "203.0.113.7").await;
        assert!(matches!(
            over,
            Err(AuthError::Security(SecurityAlert::RateLimited))
        ));
    }

    #[tokio::test]
    async fn rate_gate_fails_closed_when_the_store_is_down() {
        let engine = engine(Arc::new(DownStore), Arc::new(NullGeoProvider));
        let result = engine.rate_gate("mfa:user-1", "203.0.113.7").await;
        assert!(matches!(result, Err(AuthError::DependencyUnavailable(_))));
    }

    #[tokio::test]
    async fn assessment_survives_a_store_outage() {
        let engine = engine(Arc::new(DownStore), Arc::new(NullGeoProvider));
        let ctx = context("203.0.113.7", Some(Uuid::new_v4()));

        // Every signal source is down; the engine still answers.
        let assessment = engine.assess(RiskEventKind::Login, &ctx).await;
        assert!(!assessment.blocked);
        assert_eq!(assessment.level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn token_reuse_alert_lands_in_the_audit_trail() {
        let audit = Arc::new(MemoryRiskAudit::new());
        let engine = RiskEngine::new(
            RiskConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullGeoProvider),
            Some(audit.clone()),
        );

        engine
            .record_alert(
                RiskEventKind::Refresh,
                &context("203.0.113.7", None),
                SecurityAlert::TokenReuse,
            )
            .await;

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "refresh");
        assert!(events[0].blocked);
        assert!(i16::from(ALERT_SCORE) >= 90);
        assert_eq!(events[0].score, i16::from(ALERT_SCORE));
        assert!(events[0].factors.contains(&"token_reuse".to_string()));
    }

    #[tokio::test]
    async fn hijack_alert_carries_the_session_kind_and_user() {
        let audit = Arc::new(MemoryRiskAudit::new());
        let engine = RiskEngine::new(
            RiskConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullGeoProvider),
            Some(audit.clone()),
        );
        let user = Uuid::new_v4();

        engine
            .record_alert(
                RiskEventKind::Session,
                &context("203.0.113.7", Some(user)),
                SecurityAlert::FingerprintMismatch,
            )
            .await;

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "session");
        assert_eq!(events[0].user_id, Some(user));
        assert!(events[0]
            .factors
            .contains(&"fingerprint_mismatch".to_string()));
    }

    #[tokio::test]
    async fn assessments_are_audited() {
        let audit = Arc::new(MemoryRiskAudit::new());
        let engine = RiskEngine::new(
            RiskConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullGeoProvider),
            Some(audit.clone()),
        );

        let ctx = context("203.0.113.7", Some(Uuid::new_v4()));
        engine.assess(RiskEventKind::MfaAttempt, &ctx).await;

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "mfa_attempt");
    }

    #[tokio::test]
    async fn locked_account_raises_the_user_signal() {
        let engine = engine(Arc::new(MemoryStore::new()), Arc::new(NullGeoProvider));
        let user = Uuid::new_v4();

        let mut ctx = context("203.0.113.7", Some(user));
        let unlocked = engine.assess(RiskEventKind::Login, &ctx).await.score;
        ctx.user_locked = true;
        let locked = engine.assess(RiskEventKind::Login, &ctx).await.score;
        assert!(locked > unlocked);
    }
}
