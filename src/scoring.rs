//! Staleness scoring.
//!
//! A score starts at 100 (fully fresh) and loses points for three
//! independent reasons:
//!
//! | Penalty | Points |
//! |---------|--------|
//! | never checked | 40 |
//! | checked longer ago than `max_age_hours` | 10 per started day of excess, max 50 |
//! | never updated | 25 |
//! | updated longer ago than `2 × max_age_hours` | 5 per started day of excess, max 30 |
//! | last source status ≥ 400 | 40 |
//! | last source status 300–399 | 10 |
//!
//! The result is clamped to `[0, 100]`. A policy with `max_age_hours == 0`
//! always scores 100. Lower scores are more stale; anything below
//! [`STALE_SCORE`](crate::models::STALE_SCORE) is stale.

use chrono::{DateTime, Utc};

use crate::models::{FreshnessPolicy, FreshnessRecord};

const NEVER_CHECKED_PENALTY: f64 = 40.0;
const CHECK_PENALTY_PER_DAY: f64 = 10.0;
const CHECK_PENALTY_CAP: f64 = 50.0;
const NEVER_UPDATED_PENALTY: f64 = 25.0;
const UPDATE_PENALTY_PER_DAY: f64 = 5.0;
const UPDATE_PENALTY_CAP: f64 = 30.0;
const CLIENT_ERROR_PENALTY: f64 = 40.0;
const REDIRECT_PENALTY: f64 = 10.0;

/// Inputs the scorer reads from a freshness record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreInput {
    pub last_checked: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_status: Option<u16>,
}

impl From<&FreshnessRecord> for ScoreInput {
    fn from(record: &FreshnessRecord) -> Self {
        Self {
            last_checked: record.last_checked,
            last_updated: record.last_updated,
            last_status: record.last_status,
        }
    }
}

/// Compute the unrounded staleness score. Always within `[0, 100]`.
pub fn staleness_score(input: &ScoreInput, policy: &FreshnessPolicy, now: DateTime<Utc>) -> f64 {
    if policy.max_age_hours <= 0.0 {
        return 100.0;
    }

    let mut score = 100.0;

    score -= match input.last_checked {
        None => NEVER_CHECKED_PENALTY,
        Some(checked) => overdue_penalty(
            hours_between(checked, now),
            policy.max_age_hours,
            CHECK_PENALTY_PER_DAY,
            CHECK_PENALTY_CAP,
        ),
    };

    score -= match input.last_updated {
        None => NEVER_UPDATED_PENALTY,
        Some(updated) => overdue_penalty(
            hours_between(updated, now),
            policy.max_age_hours * 2.0,
            UPDATE_PENALTY_PER_DAY,
            UPDATE_PENALTY_CAP,
        ),
    };

    score -= match input.last_status {
        Some(status) if status >= 400 => CLIENT_ERROR_PENALTY,
        Some(status) if status >= 300 => REDIRECT_PENALTY,
        _ => 0.0,
    };

    score.clamp(0.0, 100.0)
}

/// Points lost for every started 24-hour block past `limit_hours`.
fn overdue_penalty(elapsed_hours: f64, limit_hours: f64, per_day: f64, cap: f64) -> f64 {
    if elapsed_hours <= limit_hours {
        return 0.0;
    }
    let days = ((elapsed_hours - limit_hours) / 24.0).ceil();
    (days * per_day).min(cap)
}

/// Fractional hours from `from` to `to`; negative spans count as zero.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let secs = (to - from).num_seconds().max(0);
    secs as f64 / 3600.0
}

/// Round to two decimals for display.
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy(max_age: f64) -> FreshnessPolicy {
        FreshnessPolicy {
            name: "test".to_string(),
            max_age_hours: max_age,
            stale_threshold_hours: max_age * 2.0,
            check_frequency_hours: max_age / 2.0,
        }
    }

    #[test]
    fn test_fresh_item_scores_full() {
        let now = Utc::now();
        let input = ScoreInput {
            last_checked: Some(now - Duration::hours(1)),
            last_updated: Some(now - Duration::hours(2)),
            last_status: Some(200),
        };
        assert_eq!(staleness_score(&input, &policy(24.0), now), 100.0);
    }

    #[test]
    fn test_never_checked_never_updated() {
        let now = Utc::now();
        let score = staleness_score(&ScoreInput::default(), &policy(24.0), now);
        assert_eq!(score, 35.0);
    }

    #[test]
    fn test_scenario_thirty_hours_never_updated() {
        let now = Utc::now();
        let p = FreshnessPolicy {
            name: "scenario".to_string(),
            max_age_hours: 24.0,
            stale_threshold_hours: 48.0,
            check_frequency_hours: 12.0,
        };
        let input = ScoreInput {
            last_checked: Some(now - Duration::hours(30)),
            last_updated: None,
            last_status: Some(200),
        };
        let score = staleness_score(&input, &p, now);
        assert!(score < 70.0, "score {} should be below 70", score);
        // One started day overdue (10) plus never updated (25).
        assert_eq!(score, 65.0);
    }

    #[test]
    fn test_check_penalty_caps_at_fifty() {
        let now = Utc::now();
        let input = ScoreInput {
            last_checked: Some(now - Duration::days(365)),
            last_updated: Some(now - Duration::hours(1)),
            last_status: None,
        };
        assert_eq!(staleness_score(&input, &policy(24.0), now), 50.0);
    }

    #[test]
    fn test_update_penalty_caps_at_thirty() {
        let now = Utc::now();
        let input = ScoreInput {
            last_checked: Some(now),
            last_updated: Some(now - Duration::days(365)),
            last_status: None,
        };
        assert_eq!(staleness_score(&input, &policy(24.0), now), 70.0);
    }

    #[test]
    fn test_status_penalties() {
        let now = Utc::now();
        let mut input = ScoreInput {
            last_checked: Some(now),
            last_updated: Some(now),
            last_status: Some(404),
        };
        assert_eq!(staleness_score(&input, &policy(24.0), now), 60.0);
        input.last_status = Some(301);
        assert_eq!(staleness_score(&input, &policy(24.0), now), 90.0);
        input.last_status = Some(500);
        assert_eq!(staleness_score(&input, &policy(24.0), now), 60.0);
    }

    #[test]
    fn test_zero_max_age_is_always_full() {
        let now = Utc::now();
        let input = ScoreInput {
            last_checked: None,
            last_updated: None,
            last_status: Some(500),
        };
        assert_eq!(staleness_score(&input, &policy(0.0), now), 100.0);
    }

    #[test]
    fn test_score_bounds() {
        let now = Utc::now();
        let input = ScoreInput {
            last_checked: Some(now - Duration::days(1000)),
            last_updated: None,
            last_status: Some(410),
        };
        let score = staleness_score(&input, &policy(1.0), now);
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_score_never_rises_with_elapsed_time() {
        let now = Utc::now();
        let p = policy(24.0);
        let mut previous = f64::MAX;
        for hours in (0..2000).step_by(7) {
            let input = ScoreInput {
                last_checked: Some(now - Duration::hours(hours)),
                last_updated: Some(now - Duration::hours(hours)),
                last_status: Some(200),
            };
            let score = staleness_score(&input, &p, now);
            assert!((0.0..=100.0).contains(&score));
            assert!(score <= previous, "score rose at {}h", hours);
            previous = score;
        }
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(33.33333), 33.33);
        assert_eq!(round_score(66.666), 66.67);
    }
}
