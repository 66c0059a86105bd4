//! Multi-signal risk engine.
//!
//! Scores every security-relevant event (login, MFA attempt, refresh) from
//! independent IP, user, temporal, and device signals plus attack-pattern
//! detectors, and turns the score into an allow / challenge / block decision.

mod engine;
mod geo;
mod patterns;
mod repo;
mod signals;

pub use engine::{EventContext, RiskAssessment, RiskConfig, RiskEngine, RiskEventKind, RiskLevel};
pub use geo::{haversine_km, GeoProvider, HttpGeoProvider, IpIntel, NullGeoProvider};
pub use patterns::{account_enumeration, automated_timing, credential_stuffing, AttemptSample};
pub use repo::{MemoryRiskAudit, RiskAudit, RiskEvent, RiskRepo};
pub use signals::{
    score_device, score_ip, score_temporal, score_user, IpActivity, Signal, SignalScore,
    TravelCheck,
};
