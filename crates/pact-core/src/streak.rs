//! The streak state machine: check-in transitions, passive decay, and the
//! monthly-capped restore quota.
//!
//! All functions are pure; the caller supplies dates already converted to
//! the user's timezone and persists the returned state.

use chrono::{DateTime, Months, NaiveDate, Utc};

/// A successful check-in extends the streak when the gap since the last
/// credited day is at most this many days.
pub const GRACE_DAYS: i64 = 1;

/// The decay sweep zeroes streaks with no check-in activity (of any kind)
/// for more than this many days.
pub const DECAY_AFTER_DAYS: i64 = 2;

/// Restores allowed per reset cycle.
pub const RESTORES_PER_CYCLE: i64 = 3;

/// Streak-relevant slice of a user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakState {
    pub current_streak: i64,
    pub last_successful_day: Option<NaiveDate>,
    pub last_check_in: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInOutcome {
    pub current_streak: i64,
    pub last_successful_day: Option<NaiveDate>,
    /// A prior streak was forfeited by this check-in.
    pub streak_broken: bool,
}

/// Apply a check-in for `date` to `state`.
///
/// A `stayed_on_track = false` check-in never zeroes the streak — it simply
/// fails to extend it. Only the decay sweep (no check-ins at all) forfeits a
/// streak passively; an over-grace successful check-in forfeits it actively
/// by starting over at 1.
pub fn apply_check_in(state: &StreakState, stayed_on_track: bool, date: NaiveDate) -> CheckInOutcome {
    if !stayed_on_track {
        return CheckInOutcome {
            current_streak: state.current_streak,
            last_successful_day: state.last_successful_day,
            streak_broken: false,
        };
    }

    match gap_days(state.last_successful_day, date) {
        Some(gap) if gap <= GRACE_DAYS => CheckInOutcome {
            current_streak: state.current_streak + 1,
            last_successful_day: Some(date),
            streak_broken: false,
        },
        _ => CheckInOutcome {
            current_streak: 1,
            last_successful_day: Some(date),
            // Nothing is forfeited on a first-ever success.
            streak_broken: state.current_streak > 0,
        },
    }
}

/// Whole days between the last credited day and `date`. `None` when no day
/// has ever been credited (treated as an infinite gap).
pub fn gap_days(last_successful_day: Option<NaiveDate>, date: NaiveDate) -> Option<i64> {
    last_successful_day.map(|d| (date - d).num_days())
}

/// Whether the decay sweep should zero this user's streak: a positive
/// streak with no check-in of any kind for more than `DECAY_AFTER_DAYS`.
pub fn should_decay(state: &StreakState, today: NaiveDate) -> bool {
    if state.current_streak == 0 {
        return false;
    }
    match state.last_check_in {
        None => true,
        Some(d) => (today - d).num_days() > DECAY_AFTER_DAYS,
    }
}

/// Whether `target` is a recoverable day. A recorded "slipped" check-in can
/// be restored while the chain can still reconnect (within the decay
/// window); a day with no check-in at all only within the grace window.
pub fn restore_eligible(target: NaiveDate, today: NaiveDate, had_failed_check_in: bool) -> bool {
    if target >= today {
        return false;
    }
    let age = (today - target).num_days();
    if had_failed_check_in {
        age <= DECAY_AFTER_DAYS
    } else {
        age <= GRACE_DAYS
    }
}

/// State after crediting `target` as if it had succeeded.
pub fn apply_restore(state: &StreakState, target: NaiveDate) -> (i64, NaiveDate) {
    let last = match state.last_successful_day {
        Some(d) if d > target => d,
        _ => target,
    };
    (state.current_streak + 1, last)
}

/// The quota reset mark one month after `after`.
pub fn next_quota_reset(after: DateTime<Utc>) -> DateTime<Utc> {
    after
        .checked_add_months(Months::new(1))
        .unwrap_or(after + chrono::Duration::days(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn state(streak: i64, lsd: Option<NaiveDate>, lci: Option<NaiveDate>) -> StreakState {
        StreakState {
            current_streak: streak,
            last_successful_day: lsd,
            last_check_in: lci,
        }
    }

    #[test]
    fn consecutive_day_extends() {
        let s = state(5, Some(d(2024, 1, 10)), Some(d(2024, 1, 10)));
        let out = apply_check_in(&s, true, d(2024, 1, 11));
        assert_eq!(out.current_streak, 6);
        assert_eq!(out.last_successful_day, Some(d(2024, 1, 11)));
        assert!(!out.streak_broken);
    }

    #[test]
    fn over_grace_gap_resets_to_one() {
        let s = state(5, Some(d(2024, 1, 10)), Some(d(2024, 1, 10)));
        let out = apply_check_in(&s, true, d(2024, 1, 14));
        assert_eq!(out.current_streak, 1);
        assert_eq!(out.last_successful_day, Some(d(2024, 1, 14)));
        assert!(out.streak_broken);
    }

    #[test]
    fn first_ever_success_is_not_a_break() {
        let s = state(0, None, None);
        let out = apply_check_in(&s, true, d(2024, 1, 11));
        assert_eq!(out.current_streak, 1);
        assert!(!out.streak_broken);
    }

    #[test]
    fn slipped_day_leaves_streak_untouched() {
        let s = state(5, Some(d(2024, 1, 10)), Some(d(2024, 1, 10)));
        let out = apply_check_in(&s, false, d(2024, 1, 11));
        assert_eq!(out.current_streak, 5);
        assert_eq!(out.last_successful_day, Some(d(2024, 1, 10)));
        assert!(!out.streak_broken);
    }

    #[test]
    fn repeated_slips_never_zero_the_streak() {
        let mut s = state(5, Some(d(2024, 1, 10)), Some(d(2024, 1, 10)));
        for day in 11..=20 {
            let out = apply_check_in(&s, false, d(2024, 1, day));
            s.current_streak = out.current_streak;
            s.last_successful_day = out.last_successful_day;
            s.last_check_in = Some(d(2024, 1, day));
        }
        assert_eq!(s.current_streak, 5);
    }

    #[test]
    fn decay_requires_two_silent_days() {
        let s = state(4, Some(d(2024, 1, 10)), Some(d(2024, 1, 10)));
        assert!(!should_decay(&s, d(2024, 1, 11)));
        assert!(!should_decay(&s, d(2024, 1, 12)));
        assert!(should_decay(&s, d(2024, 1, 13)));
    }

    #[test]
    fn decay_ignores_zero_streaks() {
        let s = state(0, None, None);
        assert!(!should_decay(&s, d(2024, 1, 13)));
    }

    #[test]
    fn decay_counts_any_check_in_not_just_successes() {
        // A recent "slipped" check-in keeps decay at bay.
        let s = state(4, Some(d(2024, 1, 1)), Some(d(2024, 1, 12)));
        assert!(!should_decay(&s, d(2024, 1, 13)));
    }

    #[test]
    fn restore_eligibility_windows() {
        let today = d(2024, 1, 15);
        assert!(restore_eligible(d(2024, 1, 14), today, false));
        assert!(!restore_eligible(d(2024, 1, 13), today, false));
        assert!(restore_eligible(d(2024, 1, 13), today, true));
        assert!(!restore_eligible(d(2024, 1, 12), today, true));
        assert!(!restore_eligible(today, today, true));
    }

    #[test]
    fn restore_credits_target_day() {
        let s = state(5, Some(d(2024, 1, 10)), Some(d(2024, 1, 11)));
        let (streak, last) = apply_restore(&s, d(2024, 1, 11));
        assert_eq!(streak, 6);
        assert_eq!(last, d(2024, 1, 11));
    }

    #[test]
    fn restore_keeps_newer_successful_day() {
        let s = state(5, Some(d(2024, 1, 12)), Some(d(2024, 1, 12)));
        let (streak, last) = apply_restore(&s, d(2024, 1, 11));
        assert_eq!(streak, 6);
        assert_eq!(last, d(2024, 1, 12));
    }

    #[test]
    fn quota_reset_advances_one_month() {
        let t = chrono::Utc.with_ymd_and_hms(2024, 1, 31, 8, 0, 0).unwrap();
        let next = next_quota_reset(t);
        assert_eq!(next.date_naive(), d(2024, 2, 29));
    }
}
