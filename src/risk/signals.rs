//! Independent risk signals.
//!
//! Each category is a pure function over already-collected inputs so the
//! weighting is testable without any store or provider. A source that could
//! not be read yields the explicit [`Signal::Unavailable`] outcome, which the
//! engine folds in as zero contribution with a logged warning.

use super::geo::IpIntel;
use once_cell::sync::Lazy;
use regex::Regex;

/// Outcome of one signal category.
#[derive(Clone, Debug)]
pub enum Signal {
    Scored(SignalScore),
    /// The signal source was unreachable; contributes nothing.
    Unavailable { source: &'static str },
}

/// Points plus the named factors that produced them.
#[derive(Clone, Debug, Default)]
pub struct SignalScore {
    pub points: u32,
    pub factors: Vec<String>,
}

impl SignalScore {
    fn add(&mut self, points: u32, factor: &str) {
        self.points += points;
        self.factors.push(factor.to_string());
    }
}

// IP signal weights.
const W_IP_MANY_FAILURES: u32 = 25;
const W_IP_SOME_FAILURES: u32 = 15;
const W_IP_HIGH_VELOCITY: u32 = 20;
const W_IP_ELEVATED_VELOCITY: u32 = 10;
const W_IP_DISTINCT_USERS: u32 = 30;
const W_IP_TOR: u32 = 25;
const W_IP_HOSTING: u32 = 15;
const W_IP_PROXY_OR_VPN: u32 = 10;
const W_IP_COUNTRY_TIER: u32 = 10;

// User signal weights.
const W_USER_LOCKED: u32 = 40;
const W_USER_MANY_FAILURES: u32 = 20;
const W_USER_SOME_FAILURES: u32 = 10;
const W_USER_UNSEEN_IP: u32 = 15;

// Temporal signal weights.
const W_IMPOSSIBLE_TRAVEL: u32 = 35;
const W_FAST_TRAVEL: u32 = 20;
const W_OFF_HOURS: u32 = 10;

// Device signal weights.
const W_DEVICE_AUTOMATION: u32 = 25;
const W_DEVICE_UNSEEN: u32 = 15;

const IP_FAILURE_HIGH: i64 = 10;
const IP_FAILURE_LOW: i64 = 5;
const IP_VELOCITY_HIGH: i64 = 30;
const IP_VELOCITY_LOW: i64 = 15;
const IP_DISTINCT_USER_THRESHOLD: i64 = 5;
const USER_FAILURE_HIGH: i64 = 5;
const USER_FAILURE_LOW: i64 = 3;

/// Speed above which two authentications cannot share an owner, km/h.
pub const IMPOSSIBLE_TRAVEL_KMH: f64 = 1000.0;
const FAST_TRAVEL_KMH: f64 = 500.0;

/// Minimum history before the off-hours heuristic speaks.
const MIN_HOUR_SAMPLES: u32 = 20;

/// Country tiers with elevated fraud rates, ISO 3166-1 alpha-2.
const HIGH_RISK_COUNTRIES: &[&str] = &["KP", "IR", "SY", "CU"];

static AUTOMATION_UA: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)headless|phantomjs|selenium|puppeteer|playwright|python-requests|curl/|wget/|\bbot\b|crawler|spider")
        .expect("automation user-agent pattern is valid")
});

/// Observed IP behavior within the trailing window.
#[derive(Clone, Copy, Debug, Default)]
pub struct IpActivity {
    pub failed_attempts: i64,
    pub request_velocity: i64,
    pub distinct_users: i64,
}

/// Distance/time between this request and the user's last successful
/// authentication from a different IP.
#[derive(Clone, Copy, Debug)]
pub struct TravelCheck {
    pub distance_km: f64,
    pub elapsed_secs: i64,
}

impl TravelCheck {
    /// Implied speed in km/h; short elapsed times are floored at one second.
    #[must_use]
    pub fn speed_kmh(&self) -> f64 {
        let hours = (self.elapsed_secs.max(1) as f64) / 3600.0;
        self.distance_km / hours
    }
}

#[must_use]
pub fn score_ip(activity: IpActivity, intel: &IpIntel) -> SignalScore {
    let mut score = SignalScore::default();

    if activity.failed_attempts >= IP_FAILURE_HIGH {
        score.add(W_IP_MANY_FAILURES, "ip_many_recent_failures");
    } else if activity.failed_attempts >= IP_FAILURE_LOW {
        score.add(W_IP_SOME_FAILURES, "ip_recent_failures");
    }

    if activity.request_velocity >= IP_VELOCITY_HIGH {
        score.add(W_IP_HIGH_VELOCITY, "ip_high_velocity");
    } else if activity.request_velocity >= IP_VELOCITY_LOW {
        score.add(W_IP_ELEVATED_VELOCITY, "ip_elevated_velocity");
    }

    if activity.distinct_users >= IP_DISTINCT_USER_THRESHOLD {
        score.add(W_IP_DISTINCT_USERS, "ip_many_distinct_users");
    }

    if intel.is_tor {
        score.add(W_IP_TOR, "ip_tor_exit");
    } else if intel.is_proxy || intel.is_vpn {
        score.add(W_IP_PROXY_OR_VPN, "ip_proxy_or_vpn");
    }
    if intel.is_hosting {
        score.add(W_IP_HOSTING, "ip_hosting_provider");
    }
    if intel
        .country
        .as_deref()
        .is_some_and(|c| HIGH_RISK_COUNTRIES.contains(&c))
    {
        score.add(W_IP_COUNTRY_TIER, "ip_high_risk_country");
    }

    score
}

#[must_use]
pub fn score_user(recent_failures: i64, unseen_ip: bool, locked: bool) -> SignalScore {
    let mut score = SignalScore::default();

    if locked {
        score.add(W_USER_LOCKED, "user_locked");
    }
    if recent_failures >= USER_FAILURE_HIGH {
        score.add(W_USER_MANY_FAILURES, "user_many_recent_failures");
    } else if recent_failures >= USER_FAILURE_LOW {
        score.add(W_USER_SOME_FAILURES, "user_recent_failures");
    }
    if unseen_ip {
        score.add(W_USER_UNSEEN_IP, "user_unseen_ip");
    }

    score
}

/// Off-hours access against the user's historical access-hour distribution,
/// plus the impossible-travel heuristic.
#[must_use]
pub fn score_temporal(
    hour_histogram: &[u32; 24],
    request_hour: usize,
    travel: Option<TravelCheck>,
) -> SignalScore {
    let mut score = SignalScore::default();

    let total: u32 = hour_histogram.iter().sum();
    if total >= MIN_HOUR_SAMPLES {
        let hits = hour_histogram.get(request_hour).copied().unwrap_or(0);
        // Below 5% of historical activity counts as off-hours.
        if u64::from(hits) * 20 < u64::from(total) {
            score.add(W_OFF_HOURS, "off_hours_access");
        }
    }

    if let Some(travel) = travel {
        let speed = travel.speed_kmh();
        if speed > IMPOSSIBLE_TRAVEL_KMH {
            score.add(W_IMPOSSIBLE_TRAVEL, "impossible_travel");
        } else if speed > FAST_TRAVEL_KMH {
            score.add(W_FAST_TRAVEL, "improbable_travel");
        }
    }

    score
}

#[must_use]
pub fn score_device(unseen_fingerprint: bool, user_agent: &str) -> SignalScore {
    let mut score = SignalScore::default();

    if unseen_fingerprint {
        score.add(W_DEVICE_UNSEEN, "device_unseen_fingerprint");
    }
    if AUTOMATION_UA.is_match(user_agent) {
        score.add(W_DEVICE_AUTOMATION, "device_automation_markers");
    }

    score
}
