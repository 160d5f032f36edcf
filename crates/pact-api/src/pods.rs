use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use pact_core::availability::TimeBand;
use pact_core::matching::{self, MatchProfile, POD_CAPACITY, POD_MIN_SIZE};
use pact_db::models::UserRow;
use pact_types::api::{
    AssignPodResponse, AssignmentStatus, Claims, PodMember, PodResponse,
};
use pact_types::error::EngineError;
use pact_types::events::GatewayEvent;
use pact_types::models::{AlertStatus, CrisisAlert};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::load_user;

/// Retries when a concurrent matcher invocation wins a guarded update.
const ASSIGN_RETRIES: usize = 3;

pub(crate) fn match_profile(user: &UserRow, now: DateTime<Utc>) -> MatchProfile {
    MatchProfile {
        availability: TimeBand::new(
            user.availability_start_minute as u16,
            user.availability_end_minute as u16,
        ),
        current_streak: user.current_streak,
        last_check_in: user.last_check_in_date(),
        created_at: user.created_at_ts().unwrap_or(now),
    }
}

pub async fn assign_pod(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = load_user(&state, claims.sub).await?;

    // Re-requesting after assignment is idempotent: return the current pod.
    if let Some(pod_id) = &user.pod_id {
        let pod = pod_response(&state, pod_id).await?;
        return Ok(Json(AssignPodResponse {
            status: AssignmentStatus::Assigned,
            pod: Some(pod),
        }));
    }

    let now = chrono::Utc::now();

    for attempt in 0..ASSIGN_RETRIES {
        // Waiting users, oldest first, requester included.
        let db = state.db.clone();
        let mut collected =
            tokio::task::spawn_blocking(move || db.unassigned_onboarded_users(POD_CAPACITY))
                .await
                .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;
        if !collected.iter().any(|u| u.id == user.id) {
            collected.truncate(POD_CAPACITY - 1);
            collected.push(load_user(&state, claims.sub).await?);
        }

        if collected.len() >= POD_MIN_SIZE {
            // Enough waiting users: form a new pod in one atomic batch.
            let db = state.db.clone();
            let name_index = tokio::task::spawn_blocking(move || db.next_pod_name_index())
                .await
                .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;
            let name = matching::pod_name(name_index).to_string();
            let pod_id = Uuid::new_v4();

            let db = state.db.clone();
            let pid = pod_id.to_string();
            let batch_name = name.clone();
            let member_ids: Vec<String> = collected.iter().map(|u| u.id.clone()).collect();
            let created = tokio::task::spawn_blocking(move || {
                db.create_pod_with_members(&pid, &batch_name, &member_ids)
            })
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

            if !created.applied() {
                // A concurrent matcher claimed one of our candidates.
                warn!("pod formation lost a candidate, retrying (attempt {})", attempt + 1);
                continue;
            }

            info!("formed pod '{}' with {} members", name, collected.len());

            let db = state.db.clone();
            let pid = pod_id.to_string();
            tokio::task::spawn_blocking(move || db.recompute_pod_total(&pid))
                .await
                .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

            // New members are likely connected without a room yet, so tell
            // each one directly.
            for member in &collected {
                if let Ok(member_id) = member.id.parse::<Uuid>() {
                    state
                        .dispatcher
                        .send_to_user(
                            member_id,
                            GatewayEvent::PodAssigned {
                                pod_id,
                                pod_name: name.clone(),
                                user_id: member_id,
                            },
                        )
                        .await;
                }
            }

            let pod = pod_response(&state, &pod_id.to_string()).await?;
            return Ok(Json(AssignPodResponse {
                status: AssignmentStatus::Assigned,
                pod: Some(pod),
            }));
        }

        // Too few waiting users: try existing pods with room, best match
        // first by mean responsiveness score against current members.
        let db = state.db.clone();
        let open_pods =
            tokio::task::spawn_blocking(move || db.pods_with_room(POD_CAPACITY as i64))
                .await
                .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

        if open_pods.is_empty() {
            break;
        }

        let requester_profile = match_profile(&user, now);
        let mut ranked: Vec<(f64, String, String)> = Vec::with_capacity(open_pods.len());
        for (pod, _members) in &open_pods {
            let db = state.db.clone();
            let pid = pod.id.clone();
            let members = tokio::task::spawn_blocking(move || db.get_pod_members(&pid))
                .await
                .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;
            if members.is_empty() {
                continue;
            }
            let mean_score = members
                .iter()
                .map(|m| {
                    matching::responsiveness_score(
                        &requester_profile,
                        &match_profile(m, now),
                        now,
                    )
                })
                .sum::<f64>()
                / members.len() as f64;
            ranked.push((mean_score, pod.id.clone(), pod.name.clone()));
        }
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        for (score, pod_id, pod_name) in ranked {
            let db = state.db.clone();
            let uid = user.id.clone();
            let pid = pod_id.clone();
            let joined = tokio::task::spawn_blocking(move || {
                db.try_join_pod(&uid, &pid, POD_CAPACITY as i64)
            })
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

            if joined.applied() {
                info!(
                    "{} joined pod '{}' (score {:.1})",
                    user.username, pod_name, score
                );

                // The joiner's streak now counts toward the pod total.
                let db = state.db.clone();
                let pid = pod_id.clone();
                let total = tokio::task::spawn_blocking(move || db.recompute_pod_total(&pid))
                    .await
                    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

                if let Ok(pod_uuid) = pod_id.parse::<Uuid>() {
                    state
                        .dispatcher
                        .send_to_user(
                            claims.sub,
                            GatewayEvent::PodAssigned {
                                pod_id: pod_uuid,
                                pod_name: pod_name.clone(),
                                user_id: claims.sub,
                            },
                        )
                        .await;
                    state.dispatcher.broadcast_to_pod(GatewayEvent::PodUpdate {
                        pod_id: pod_uuid,
                        total_streak: total,
                    });
                }

                let pod = pod_response(&state, &pod_id).await?;
                return Ok(Json(AssignPodResponse {
                    status: AssignmentStatus::Assigned,
                    pod: Some(pod),
                }));
            }
        }

        break;
    }

    // Deferred, not failed: the caller retries later.
    Ok(Json(AssignPodResponse {
        status: AssignmentStatus::Waiting,
        pod: None,
    }))
}

pub async fn get_pod(
    State(state): State<AppState>,
    Path(pod_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = load_user(&state, claims.sub).await?;
    if user.pod_id.as_deref() != Some(pod_id.to_string().as_str()) {
        return Err(EngineError::InvalidPod.into());
    }

    let pod = pod_response(&state, &pod_id.to_string()).await?;
    Ok(Json(pod))
}

/// Assemble the full pod view used both as an endpoint response and as the
/// client's polling reconciliation target.
pub(crate) async fn pod_response(state: &AppState, pod_id: &str) -> Result<PodResponse, ApiError> {
    let db = state.db.clone();
    let pid = pod_id.to_string();
    let (pod, members, alerts) = tokio::task::spawn_blocking(move || {
        let pod = db.get_pod(&pid)?;
        let members = db.get_pod_members(&pid)?;
        let alerts = db.active_alerts_for_pod(&pid)?;
        Ok::<_, anyhow::Error>((pod, members, alerts))
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    let pod = pod.ok_or(EngineError::NotFound("pod"))?;

    let members = members
        .iter()
        .filter_map(|m| {
            Some(PodMember {
                user_id: m.id.parse().ok()?,
                display_name: m.display_name.clone(),
                current_streak: m.current_streak,
                last_check_in: m.last_check_in_date(),
                is_synthetic: m.is_synthetic,
            })
        })
        .collect();

    let active_alerts = alerts
        .iter()
        .filter_map(|a| {
            Some(CrisisAlert {
                id: a.id.parse().ok()?,
                user_id: a.user_id.parse().ok()?,
                pod_id: a.pod_id.parse().ok()?,
                message: a.message.clone(),
                status: AlertStatus::Active,
                response_count: a.response_count,
                created_at: pact_db::models::parse_timestamp(&a.created_at)?,
                resolved_at: None,
            })
        })
        .collect();

    Ok(PodResponse {
        id: pod.id.parse().map_err(|_| EngineError::NotFound("pod"))?,
        name: pod.name,
        total_streak: pod.total_streak,
        members,
        active_alerts,
    })
}
