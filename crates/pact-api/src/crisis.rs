use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use pact_core::availability::{TimeBand, local_minute_of_day};
use pact_core::escalation::{self, SyntheticRequest};
use pact_db::models::UserRow;
use pact_types::api::{AlertActionResponse, Claims, CrisisRequest, CrisisResponse};
use pact_types::error::EngineError;
use pact_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::load_user;

/// Entry point of the escalation protocol: reachable humans get an alert,
/// unreachable ones are represented by their availability messages, and an
/// empty field produces a synthetic response from the timed state machine.
pub async fn request_support(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CrisisRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Utc::now();
    let requester = load_user(&state, claims.sub).await?;
    let pod_id = requester
        .pod_id
        .clone()
        .ok_or(EngineError::InvalidPod)?;

    let db = state.db.clone();
    let pid = pod_id.clone();
    let (pod, members) = tokio::task::spawn_blocking(move || {
        let pod = db.get_pod(&pid)?;
        let members = db.get_pod_members(&pid)?;
        Ok::<_, anyhow::Error>((pod, members))
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    let pod = pod.ok_or(EngineError::InvalidPod)?;
    let roster: Vec<&UserRow> = members.iter().filter(|m| m.id != requester.id).collect();
    let humans: Vec<&UserRow> = roster.iter().copied().filter(|m| !m.is_synthetic).collect();

    // Step 1: anyone reachable right now? A member counts as reachable when
    // the current time falls inside their stated window, or when they hold a
    // live gateway connection regardless of the window.
    let mut reachable = false;
    for m in &humans {
        let band = TimeBand::new(
            m.availability_start_minute as u16,
            m.availability_end_minute as u16,
        );
        if band.contains(local_minute_of_day(now, m.tz_offset_minutes as i32)) {
            reachable = true;
            break;
        }
        if let Ok(member_id) = m.id.parse::<Uuid>() {
            if state.dispatcher.is_online(member_id).await {
                reachable = true;
                break;
            }
        }
    }

    if reachable {
        let alert_id = Uuid::new_v4();
        let db = state.db.clone();
        let aid = alert_id.to_string();
        let uid = requester.id.clone();
        let pid = pod_id.clone();
        let message = req.message.clone();
        tokio::task::spawn_blocking(move || {
            db.insert_crisis_alert(&aid, &uid, &pid, message.as_deref())
        })
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

        info!("{} raised crisis alert {}", requester.username, alert_id);

        if let Ok(pod_uuid) = pod_id.parse::<Uuid>() {
            state
                .dispatcher
                .broadcast_to_pod(GatewayEvent::CrisisAlertCreate {
                    pod_id: pod_uuid,
                    alert_id,
                    user_id: claims.sub,
                    display_name: requester.display_name.clone(),
                    message: req.message.clone(),
                    created_at: now,
                });
        }

        return Ok((
            StatusCode::CREATED,
            Json(CrisisResponse::AlertCreated { alert_id }),
        ));
    }

    // Step 2: nobody reachable — rotate through availability messages left
    // by unreachable members.
    let candidates: Vec<&UserRow> = humans
        .iter()
        .copied()
        .filter(|m| {
            m.availability_message
                .as_deref()
                .is_some_and(|msg| !msg.trim().is_empty())
        })
        .collect();

    if !candidates.is_empty() {
        let candidate_ids: Vec<Uuid> = candidates
            .iter()
            .filter_map(|m| m.id.parse().ok())
            .collect();
        let last_shown: Option<Uuid> = pod
            .last_shown_message_user_id
            .as_deref()
            .and_then(|s| s.parse().ok());

        let chosen_id = escalation::rotate_choice(&candidate_ids, last_shown, &mut rand::rng())
            .ok_or(EngineError::NotFound("availability message"))?;
        let chosen = candidates
            .iter()
            .find(|m| m.id.parse::<Uuid>().ok() == Some(chosen_id))
            .ok_or(EngineError::NotFound("availability message"))?;

        // Compare-and-set the rotation cursor; losing the race to a
        // concurrent request is fine, the message is still valid.
        let db = state.db.clone();
        let pid = pod_id.clone();
        let expected = pod.last_shown_message_user_id.clone();
        let new_cursor = chosen.id.clone();
        let cas = tokio::task::spawn_blocking(move || {
            db.set_last_shown_message_user(&pid, expected.as_deref(), &new_cursor)
        })
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;
        if !cas.applied() {
            debug!("rotation cursor moved concurrently for pod {}", pod_id);
        }

        return Ok((
            StatusCode::OK,
            Json(CrisisResponse::AvailabilityMessage {
                user_id: chosen_id,
                display_name: chosen.display_name.clone(),
                message: chosen
                    .availability_message
                    .clone()
                    .unwrap_or_default(),
            }),
        ));
    }

    // Step 3: synthetic response, timed by elapsed seconds since the
    // conversation started.
    let elapsed_secs = req
        .started_at
        .map(|t| (now - t).num_seconds().max(0) as u64)
        .unwrap_or(0);

    let phase = escalation::phase_for_elapsed(elapsed_secs);

    // Prefer the external content provider when configured; any failure
    // falls back to the static tables without surfacing an error.
    let context = format!(
        "crisis support, elapsed {}s, current streak {}",
        elapsed_secs, requester.current_streak
    );
    let text = match state
        .support
        .fetch(requester.goal_category.as_deref(), &context)
        .await
    {
        Ok(text) => text,
        Err(_) => {
            let request = SyntheticRequest {
                display_name: &requester.display_name,
                current_streak: requester.current_streak,
                goal_category: requester.goal_category.as_deref(),
                elapsed_secs,
                already_shown: &req.already_shown,
            };
            let (_, text) = escalation::synthetic_response(&request, &mut rand::rng());
            text
        }
    };

    Ok((
        StatusCode::OK,
        Json(CrisisResponse::Synthetic {
            phase: phase.as_str().to_string(),
            text,
        }),
    ))
}

/// A pod member acknowledges an active alert.
pub async fn respond_to_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (responder, alert) = member_and_alert(&state, claims.sub, alert_id).await?;

    let db = state.db.clone();
    let aid = alert_id.to_string();
    let count = tokio::task::spawn_blocking(move || db.increment_alert_responses(&aid))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??
        .ok_or(EngineError::NotFound("active alert"))?;

    if let Ok(pod_uuid) = alert.pod_id.parse::<Uuid>() {
        state
            .dispatcher
            .broadcast_to_pod(GatewayEvent::CrisisAlertResponse {
                pod_id: pod_uuid,
                alert_id,
                user_id: claims.sub,
                display_name: responder.display_name.clone(),
                response_count: count,
            });
    }

    Ok(Json(AlertActionResponse {
        alert_id,
        response_count: count,
    }))
}

/// Resolve an alert: active → resolved, terminal. Any pod member, including
/// the requester, may resolve; a repeat resolve is an idempotent no-op.
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, alert) = member_and_alert(&state, claims.sub, alert_id).await?;

    let db = state.db.clone();
    let aid = alert_id.to_string();
    let resolved = tokio::task::spawn_blocking(move || db.resolve_crisis_alert(&aid))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    if resolved.applied() {
        info!("crisis alert {} resolved by {}", alert_id, claims.sub);
        if let Ok(pod_uuid) = alert.pod_id.parse::<Uuid>() {
            state
                .dispatcher
                .broadcast_to_pod(GatewayEvent::CrisisAlertResolve {
                    pod_id: pod_uuid,
                    alert_id,
                    resolved_by: claims.sub,
                });
        }
    }

    Ok(Json(AlertActionResponse {
        alert_id,
        response_count: alert.response_count,
    }))
}

/// Load the caller and the alert, enforcing pod membership.
async fn member_and_alert(
    state: &AppState,
    caller: Uuid,
    alert_id: Uuid,
) -> Result<(UserRow, pact_db::models::CrisisAlertRow), ApiError> {
    let user = load_user(state, caller).await?;

    let db = state.db.clone();
    let aid = alert_id.to_string();
    let alert = tokio::task::spawn_blocking(move || db.get_crisis_alert(&aid))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??
        .ok_or(EngineError::NotFound("alert"))?;

    if user.pod_id.as_deref() != Some(alert.pod_id.as_str()) {
        return Err(EngineError::InvalidPod.into());
    }

    Ok((user, alert))
}
