use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared across pact-api (REST middleware) and pact-gateway
/// (WebSocket authentication). Canonical definition lives here in pact-types
/// to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    /// "HH:MM" local time-of-day, start of the daily active window.
    pub availability_start: Option<String>,
    /// "HH:MM" local time-of-day, end of the daily active window.
    pub availability_end: Option<String>,
    pub tz_offset_minutes: Option<i32>,
    pub goal_category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Check-ins --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckInRequest {
    pub stayed_on_track: bool,
    /// Calendar date in the user's timezone. Defaults to the user's current
    /// local date.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub stayed_on_track: bool,
    pub current_streak: i64,
    /// True when a prior streak was forfeited by this check-in (grace period
    /// exceeded).
    pub streak_broken: bool,
    pub pod_total_streak: Option<i64>,
}

// -- Restores --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestoreRequest {
    /// Day to recover. Defaults to yesterday in the user's timezone.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub user_id: Uuid,
    pub restored_date: NaiveDate,
    pub current_streak: i64,
    pub restores_remaining: i64,
}

// -- Pods --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// The requester was placed into a pod.
    Assigned,
    /// Not enough waiting users and no pod with room; retry later.
    Waiting,
}

#[derive(Debug, Serialize)]
pub struct AssignPodResponse {
    pub status: AssignmentStatus,
    pub pod: Option<PodResponse>,
}

#[derive(Debug, Serialize)]
pub struct PodResponse {
    pub id: Uuid,
    pub name: String,
    pub total_streak: i64,
    pub members: Vec<PodMember>,
    /// Unresolved alerts, included so clients can reconcile missed
    /// `CrisisAlertCreate` events on refetch.
    pub active_alerts: Vec<crate::models::CrisisAlert>,
}

#[derive(Debug, Serialize)]
pub struct PodMember {
    pub user_id: Uuid,
    pub display_name: String,
    pub current_streak: i64,
    pub last_check_in: Option<NaiveDate>,
    pub is_synthetic: bool,
}

// -- Crisis --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrisisRequest {
    pub message: Option<String>,
    /// Timestamp of the originating request in this crisis conversation.
    /// Absent on the first call (elapsed = 0).
    pub started_at: Option<DateTime<Utc>>,
    /// Texts already shown in this conversation, for anti-repeat selection.
    #[serde(default)]
    pub already_shown: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrisisResponse {
    /// Human pod members are reachable right now; an alert was created and
    /// fanned out to the pod room.
    AlertCreated { alert_id: Uuid },

    /// Nobody is reachable, but an unreachable member left a message.
    AvailabilityMessage {
        user_id: Uuid,
        display_name: String,
        message: String,
    },

    /// Synthetic support response from the timed escalation machine.
    Synthetic { phase: String, text: String },
}

#[derive(Debug, Serialize)]
pub struct AlertActionResponse {
    pub alert_id: Uuid,
    pub response_count: i64,
}
