use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use pact_core::availability::local_date;
use pact_core::streak::{self, StreakState};
use pact_db::models::UserRow;
use pact_types::api::{CheckInRequest, CheckInResponse, Claims};
use pact_types::error::EngineError;
use pact_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::load_user;

pub(crate) fn streak_state(user: &UserRow) -> StreakState {
    StreakState {
        current_streak: user.current_streak,
        last_successful_day: user.last_successful_day_date(),
        last_check_in: user.last_check_in_date(),
    }
}

pub async fn check_in(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CheckInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Utc::now();
    let user = load_user(&state, claims.sub).await?;

    let date = req
        .date
        .unwrap_or_else(|| local_date(now, user.tz_offset_minutes as i32));

    let outcome = streak::apply_check_in(&streak_state(&user), req.stayed_on_track, date);

    // The UNIQUE(user_id, date) constraint serializes concurrent check-ins
    // for the same day; a loser rolls back without touching streak state.
    let db = state.db.clone();
    let checkin_id = Uuid::new_v4().to_string();
    let uid = user.id.clone();
    let date_str = date.to_string();
    let lsd = outcome.last_successful_day.map(|d| d.to_string());
    let stayed = req.stayed_on_track;
    let new_streak = outcome.current_streak;
    let recorded = tokio::task::spawn_blocking(move || {
        db.record_check_in(&checkin_id, &uid, &date_str, stayed, new_streak, lsd.as_deref())
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    if !recorded.applied() {
        return Err(EngineError::DuplicateCheckIn.into());
    }

    info!(
        "{} checked in for {} (on_track={}, streak {} -> {})",
        user.username, date, stayed, user.current_streak, outcome.current_streak
    );

    let pod_total = match &user.pod_id {
        Some(pod_id) => Some(
            announce_streak_change(
                &state,
                pod_id,
                claims.sub,
                outcome.current_streak,
                outcome.streak_broken,
            )
            .await?,
        ),
        None => None,
    };

    Ok((
        StatusCode::CREATED,
        Json(CheckInResponse {
            user_id: claims.sub,
            date,
            stayed_on_track: stayed,
            current_streak: outcome.current_streak,
            streak_broken: outcome.streak_broken,
            pod_total_streak: pod_total,
        }),
    ))
}

/// Recompute the pod's denormalized total and fan out the streak and pod
/// updates to the room. Shared by check-ins and restores; the decay sweep
/// goes through the same recompute on the db side.
pub(crate) async fn announce_streak_change(
    state: &AppState,
    pod_id: &str,
    user_id: Uuid,
    current_streak: i64,
    streak_broken: bool,
) -> Result<i64, ApiError> {
    let db = state.db.clone();
    let pid = pod_id.to_string();
    let total = tokio::task::spawn_blocking(move || db.recompute_pod_total(&pid))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    if let Ok(pod_uuid) = pod_id.parse::<Uuid>() {
        state.dispatcher.broadcast_to_pod(GatewayEvent::StreakUpdate {
            pod_id: pod_uuid,
            user_id,
            current_streak,
            streak_broken,
        });
        state.dispatcher.broadcast_to_pod(GatewayEvent::PodUpdate {
            pod_id: pod_uuid,
            total_streak: total,
        });
    }

    Ok(total)
}
