//! Pod formation rules and the pairwise responsiveness score.

use chrono::{DateTime, NaiveDate, Utc};

use crate::availability::{MINUTES_PER_DAY, TimeBand, overlap_minutes};

/// Maximum pod size. Assignment never exceeds this.
pub const POD_CAPACITY: usize = 4;

/// Minimum number of waiting users required to form a new pod.
pub const POD_MIN_SIZE: usize = 3;

/// Round-robin pod names. The matcher persists a counter and walks this
/// list; names repeat once the list is exhausted.
pub const POD_NAMES: &[&str] = &[
    "Daybreak", "Northstar", "Waypoint", "Foothold", "Summit", "Basecamp",
    "Beacon", "Cairn", "Harbor", "Ridgeline",
];

pub fn pod_name(index: u64) -> &'static str {
    POD_NAMES[(index % POD_NAMES.len() as u64) as usize]
}

/// The matching-relevant slice of a user.
#[derive(Debug, Clone)]
pub struct MatchProfile {
    pub availability: TimeBand,
    pub current_streak: i64,
    pub last_check_in: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Pairwise responsiveness score in [0, 100].
///
/// 50 × (overlap / 1440) for shared waking hours, up to 25 for streak
/// momentum, a recency bonus when both users checked in lately, and a small
/// boost for pairs of new accounts so fresh users cluster together.
pub fn responsiveness_score(a: &MatchProfile, b: &MatchProfile, now: DateTime<Utc>) -> f64 {
    let today = now.date_naive();

    let overlap = overlap_minutes(a.availability, b.availability) as f64;
    let overlap_term = 50.0 * overlap / MINUTES_PER_DAY as f64;

    let avg_streak = (a.current_streak + b.current_streak) as f64 / 2.0;
    let streak_term = (2.0 * avg_streak).min(25.0);

    let recency_term = match (days_since(a.last_check_in, today), days_since(b.last_check_in, today)) {
        (Some(da), Some(db)) => {
            let worst = da.max(db);
            if worst <= 1 {
                15.0
            } else if worst <= 3 {
                10.0
            } else if worst <= 7 {
                5.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let avg_age_days =
        ((now - a.created_at).num_days() + (now - b.created_at).num_days()) as f64 / 2.0;
    let new_account_term = if avg_age_days < 7.0 {
        10.0
    } else if avg_age_days < 30.0 {
        5.0
    } else {
        0.0
    };

    (overlap_term + streak_term + recency_term + new_account_term).clamp(0.0, 100.0)
}

fn days_since(date: Option<NaiveDate>, today: NaiveDate) -> Option<i64> {
    date.map(|d| (today - d).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::parse_hhmm;
    use chrono::TimeZone;

    fn profile(
        start: &str,
        end: &str,
        streak: i64,
        last_check_in: Option<NaiveDate>,
        age_days: i64,
        now: DateTime<Utc>,
    ) -> MatchProfile {
        MatchProfile {
            availability: TimeBand::new(parse_hhmm(start).unwrap(), parse_hhmm(end).unwrap()),
            current_streak: streak,
            last_check_in,
            created_at: now - chrono::Duration::days(age_days),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn score_within_bounds() {
        let now = now();
        let today = now.date_naive();
        let extremes = [
            profile("00:00", "23:59", 1000, Some(today), 0, now),
            profile("09:00", "09:00", 0, None, 5000, now),
            profile("22:00", "06:00", 3, Some(today - chrono::Duration::days(2)), 20, now),
        ];
        for a in &extremes {
            for b in &extremes {
                let s = responsiveness_score(a, b, now);
                assert!((0.0..=100.0).contains(&s), "score {} out of range", s);
            }
        }
    }

    #[test]
    fn heavy_users_stay_capped() {
        let now = now();
        let a = profile("00:00", "23:59", 50, Some(now.date_naive()), 1, now);
        let s = responsiveness_score(&a, &a.clone(), now);
        assert!(s > 99.0);
        assert!(s <= 100.0);
    }

    #[test]
    fn recency_requires_both_users() {
        let now = now();
        let today = now.date_naive();
        let active = profile("09:00", "17:00", 0, Some(today), 100, now);
        let dormant = profile("09:00", "17:00", 0, None, 100, now);

        let both = responsiveness_score(&active, &active.clone(), now);
        let one = responsiveness_score(&active, &dormant, now);
        assert!((both - one - 15.0).abs() < 1e-9);
    }

    #[test]
    fn pod_names_round_robin() {
        assert_eq!(pod_name(0), POD_NAMES[0]);
        assert_eq!(pod_name(POD_NAMES.len() as u64), POD_NAMES[0]);
        assert_eq!(pod_name(POD_NAMES.len() as u64 + 2), POD_NAMES[2]);
    }
}
