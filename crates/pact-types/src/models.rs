use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub pod_id: Option<Uuid>,
    pub current_streak: i64,
    pub last_check_in: Option<NaiveDate>,
    pub last_successful_day: Option<NaiveDate>,
    /// Daily active-hours window, minutes since local midnight. May wrap
    /// past midnight (start > end).
    pub availability_start_minute: u16,
    pub availability_end_minute: u16,
    /// User timezone as a fixed offset from UTC, in minutes.
    pub tz_offset_minutes: i32,
    pub availability_message: Option<String>,
    pub restores_used_this_month: i64,
    pub restores_reset_at: DateTime<Utc>,
    pub is_synthetic: bool,
    pub goal_category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: Uuid,
    pub name: String,
    pub total_streak: i64,
    /// Anti-repeat cursor for availability-message rotation.
    pub last_shown_message_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisAlert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pod_id: Uuid,
    pub message: Option<String>,
    pub status: AlertStatus,
    pub response_count: i64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
