use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Datelike;
use tracing::info;
use uuid::Uuid;

use pact_core::availability::local_date;
use pact_core::streak::{self, RESTORES_PER_CYCLE};
use pact_types::api::{Claims, RestoreRequest, RestoreResponse};
use pact_types::error::EngineError;

use crate::auth::AppState;
use crate::checkins::{announce_streak_change, streak_state};
use crate::error::ApiError;
use crate::load_user;

pub async fn use_restore(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RestoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Utc::now();
    let mut user = load_user(&state, claims.sub).await?;

    // Lazy cycle reset: the quota window advances monthly, checked on use.
    let cycle_expired = user.restores_reset_at_ts().is_none_or(|t| now >= t);
    if cycle_expired {
        let db = state.db.clone();
        let uid = user.id.clone();
        let next_reset = streak::next_quota_reset(now).to_rfc3339();
        tokio::task::spawn_blocking(move || db.reset_restore_cycle(&uid, &next_reset))
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;
        user.restores_used_this_month = 0;
    }

    if user.restores_used_this_month >= RESTORES_PER_CYCLE {
        return Err(EngineError::QuotaExceeded.into());
    }

    let today = local_date(now, user.tz_offset_minutes as i32);
    let target = req
        .date
        .unwrap_or_else(|| today.pred_opt().unwrap_or(today));

    // A day that already succeeded has nothing to recover.
    let db = state.db.clone();
    let uid = user.id.clone();
    let target_str = target.to_string();
    let existing = tokio::task::spawn_blocking(move || db.get_check_in(&uid, &target_str))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    let had_failed_check_in = match &existing {
        Some(c) if c.stayed_on_track => {
            return Err(EngineError::NotFound("recoverable day").into());
        }
        Some(_) => true,
        None => false,
    };

    if !streak::restore_eligible(target, today, had_failed_check_in) {
        return Err(EngineError::NotFound("recoverable day").into());
    }

    let (new_streak, new_last_successful_day) =
        streak::apply_restore(&streak_state(&user), target);

    // Conditional quota increment + streak update + audit row, one
    // transaction. A concurrent 4th attempt loses here even after the
    // handler-level check above passed.
    let db = state.db.clone();
    let audit_id = Uuid::new_v4().to_string();
    let uid = user.id.clone();
    let target_str = target.to_string();
    let lsd = new_last_successful_day.to_string();
    let streak_at_restore = user.current_streak;
    let outcome = tokio::task::spawn_blocking(move || {
        db.use_restore(
            &audit_id,
            &uid,
            &target_str,
            streak_at_restore,
            new_streak,
            &lsd,
            target.month() as i64,
            target.year() as i64,
            RESTORES_PER_CYCLE,
        )
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    if !outcome.applied() {
        return Err(EngineError::QuotaExceeded.into());
    }

    let restores_remaining = RESTORES_PER_CYCLE - user.restores_used_this_month - 1;
    info!(
        "{} restored {} (streak {} -> {}, {} restores left)",
        user.username, target, user.current_streak, new_streak, restores_remaining
    );

    if let Some(pod_id) = &user.pod_id {
        announce_streak_change(&state, pod_id, claims.sub, new_streak, false).await?;
    }

    Ok(Json(RestoreResponse {
        user_id: claims.sub,
        restored_date: target,
        current_streak: new_streak,
        restores_remaining,
    }))
}
