use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use pact_core::availability::local_date;
use pact_core::streak::{StreakState, should_decay};
use pact_db::Database;
use pact_gateway::dispatcher::Dispatcher;
use pact_types::events::GatewayEvent;

/// Background task that zeroes abandoned streaks.
///
/// Runs on an interval, finds users with a positive streak and no check-in
/// of any kind for more than the decay window, resets them through the same
/// streak rule the request path uses, and fans out the updates.
pub async fn run_decay_loop(db: Arc<Database>, dispatcher: Dispatcher, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match sweep_abandoned_streaks(&db, &dispatcher).await {
            Ok(count) => {
                if count > 0 {
                    info!("Decay sweep: reset {} abandoned streaks", count);
                }
            }
            Err(e) => {
                warn!("Decay sweep error: {}", e);
            }
        }
    }
}

async fn sweep_abandoned_streaks(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
) -> anyhow::Result<usize> {
    let now = chrono::Utc::now();

    let db_scan = db.clone();
    let users = tokio::task::spawn_blocking(move || db_scan.users_with_active_streaks()).await??;

    let mut reset_count = 0usize;
    let mut touched_pods: HashSet<String> = HashSet::new();

    for user in users {
        // Decay is judged against the user's own calendar, like check-ins.
        let today = local_date(now, user.tz_offset_minutes as i32);
        let state = StreakState {
            current_streak: user.current_streak,
            last_successful_day: user.last_successful_day_date(),
            last_check_in: user.last_check_in_date(),
        };
        if !should_decay(&state, today) {
            continue;
        }

        let db_write = db.clone();
        let uid = user.id.clone();
        tokio::task::spawn_blocking(move || db_write.decay_streak(&uid)).await??;
        reset_count += 1;

        if let (Some(pod_id), Ok(user_uuid)) = (&user.pod_id, user.id.parse::<Uuid>()) {
            touched_pods.insert(pod_id.clone());
            if let Ok(pod_uuid) = pod_id.parse::<Uuid>() {
                dispatcher.broadcast_to_pod(GatewayEvent::StreakUpdate {
                    pod_id: pod_uuid,
                    user_id: user_uuid,
                    current_streak: 0,
                    streak_broken: true,
                });
            }
        }
    }

    for pod_id in touched_pods {
        let db_total = db.clone();
        let pid = pod_id.clone();
        let total = tokio::task::spawn_blocking(move || db_total.recompute_pod_total(&pid)).await??;
        if let Ok(pod_uuid) = pod_id.parse::<Uuid>() {
            dispatcher.broadcast_to_pod(GatewayEvent::PodUpdate {
                pod_id: pod_uuid,
                total_streak: total,
            });
        }
    }

    Ok(reset_count)
}
