//! Database row types — these map directly to SQLite rows.
//! Distinct from pact-types API models to keep the DB layer independent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub pod_id: Option<String>,
    pub current_streak: i64,
    pub last_check_in: Option<String>,
    pub last_successful_day: Option<String>,
    pub availability_start_minute: i64,
    pub availability_end_minute: i64,
    pub tz_offset_minutes: i64,
    pub availability_message: Option<String>,
    pub restores_used_this_month: i64,
    pub restores_reset_at: String,
    pub is_synthetic: bool,
    pub goal_category: Option<String>,
    pub onboarded: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn last_check_in_date(&self) -> Option<NaiveDate> {
        self.last_check_in.as_deref().and_then(parse_date)
    }

    pub fn last_successful_day_date(&self) -> Option<NaiveDate> {
        self.last_successful_day.as_deref().and_then(parse_date)
    }

    pub fn restores_reset_at_ts(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.restores_reset_at)
    }

    pub fn created_at_ts(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }
}

pub struct PodRow {
    pub id: String,
    pub name: String,
    pub total_streak: i64,
    pub last_shown_message_user_id: Option<String>,
    pub created_at: String,
}

pub struct CheckInRow {
    pub id: String,
    pub user_id: String,
    pub date: String,
    pub stayed_on_track: bool,
    pub created_at: String,
}

pub struct CrisisAlertRow {
    pub id: String,
    pub user_id: String,
    pub pod_id: String,
    pub message: Option<String>,
    pub status: String,
    pub response_count: i64,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Timestamps arrive either as RFC 3339 (written by the app) or as
/// SQLite's "YYYY-MM-DD HH:MM:SS" (written by column defaults).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}
