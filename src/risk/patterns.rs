//! Attack-pattern detectors over recent attempt samples.
//!
//! Pure functions: the engine hands them the trailing window of attempts for
//! an IP and they answer yes or no. Thresholds are tuned for a 5-minute
//! window.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One authentication or MFA attempt as seen from a single IP.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct AttemptSample {
    pub user_id: Option<Uuid>,
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// Window the detectors reason over, in seconds.
pub const DETECTION_WINDOW_SECS: i64 = 5 * 60;

const STUFFING_MIN_ATTEMPTS: usize = 15;
const STUFFING_MIN_USERS: usize = 5;
const ENUMERATION_MIN_FAILURES: usize = 12;
const ENUMERATION_MIN_USERS: usize = 8;
const TIMING_MIN_ATTEMPTS: usize = 10;
const TIMING_MAX_MEAN_MS: f64 = 2000.0;
const TIMING_MAX_VARIATION: f64 = 0.25;

fn within_window(attempts: &[AttemptSample], now: DateTime<Utc>) -> Vec<&AttemptSample> {
    attempts
        .iter()
        .filter(|a| (now - a.at).num_seconds() <= DETECTION_WINDOW_SECS)
        .collect()
}

fn distinct_users(attempts: &[&AttemptSample]) -> usize {
    let mut users: Vec<Uuid> = attempts.iter().filter_map(|a| a.user_id).collect();
    users.sort();
    users.dedup();
    users.len()
}

/// Credential stuffing: one IP trying many accounts at volume.
#[must_use]
pub fn credential_stuffing(attempts: &[AttemptSample], now: DateTime<Utc>) -> bool {
    let recent = within_window(attempts, now);
    recent.len() >= STUFFING_MIN_ATTEMPTS && distinct_users(&recent) >= STUFFING_MIN_USERS
}

/// Account enumeration: failures spread across many distinct accounts from
/// one IP, typically probing which accounts exist.
#[must_use]
pub fn account_enumeration(attempts: &[AttemptSample], now: DateTime<Utc>) -> bool {
    let recent = within_window(attempts, now);
    let failures: Vec<&AttemptSample> = recent.into_iter().filter(|a| !a.success).collect();
    failures.len() >= ENUMERATION_MIN_FAILURES && distinct_users(&failures) >= ENUMERATION_MIN_USERS
}

/// Automated timing: high-frequency attempts with near-constant spacing,
/// the signature of a script rather than a human.
#[must_use]
pub fn automated_timing(attempts: &[AttemptSample], now: DateTime<Utc>) -> bool {
    let mut recent = within_window(attempts, now);
    if recent.len() < TIMING_MIN_ATTEMPTS {
        return false;
    }
    recent.sort_by_key(|a| a.at);

    let intervals_ms: Vec<f64> = recent
        .windows(2)
        .map(|pair| (pair[1].at - pair[0].at).num_milliseconds() as f64)
        .collect();
    if intervals_ms.is_empty() {
        return false;
    }

    let mean = intervals_ms.iter().sum::<f64>() / intervals_ms.len() as f64;
    if mean <= 0.0 || mean > TIMING_MAX_MEAN_MS {
        return false;
    }
    let variance = intervals_ms
        .iter()
        .map(|ms| (ms - mean).powi(2))
        .sum::<f64>()
        / intervals_ms.len() as f64;
    let variation = variance.sqrt() / mean;

    variation < TIMING_MAX_VARIATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn attempt(user: Uuid, success: bool, seconds_ago: i64, now: DateTime<Utc>) -> AttemptSample {
        AttemptSample {
            user_id: Some(user),
            success,
            at: now - Duration::seconds(seconds_ago),
        }
    }

    #[test]
    fn stuffing_needs_volume_and_spread() {
        let now = Utc::now();
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

        // 20 failures across 5 accounts within the window.
        let attempts: Vec<AttemptSample> = (0..20)
            .map(|i| attempt(users[i % 5], false, i as i64, now))
            .collect();
        assert!(credential_stuffing(&attempts, now));

        // Same volume against one account is brute force, not stuffing.
        let single: Vec<AttemptSample> = (0..20)
            .map(|i| attempt(users[0], false, i as i64, now))
            .collect();
        assert!(!credential_stuffing(&single, now));
    }

    #[test]
    fn stuffing_ignores_attempts_outside_the_window() {
        let now = Utc::now();
        let attempts: Vec<AttemptSample> = (0..20)
            .map(|i| attempt(Uuid::new_v4(), false, 600 + i as i64, now))
            .collect();
        assert!(!credential_stuffing(&attempts, now));
    }

    #[test]
    fn enumeration_needs_failures_across_many_accounts() {
        let now = Utc::now();
        let attempts: Vec<AttemptSample> = (0..12)
            .map(|i| attempt(Uuid::new_v4(), false, i as i64, now))
            .collect();
        assert!(account_enumeration(&attempts, now));

        // Successes across many accounts are not enumeration.
        let successes: Vec<AttemptSample> = (0..12)
            .map(|i| attempt(Uuid::new_v4(), true, i as i64, now))
            .collect();
        assert!(!account_enumeration(&successes, now));
    }

    #[test]
    fn metronome_spacing_reads_as_automation() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        // One attempt per second, exactly.
        let scripted: Vec<AttemptSample> = (0..12)
            .map(|i| attempt(user, false, i as i64, now))
            .collect();
        assert!(automated_timing(&scripted, now));
    }

    #[test]
    fn human_jitter_is_not_automation() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let offsets = [0, 3, 11, 14, 29, 33, 52, 58, 83, 95, 130, 144];
        let human: Vec<AttemptSample> = offsets
            .iter()
            .map(|&s| attempt(user, false, s, now))
            .collect();
        assert!(!automated_timing(&human, now));
    }
}
