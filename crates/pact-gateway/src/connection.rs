use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use pact_db::Database;
use pact_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, Ready event,
/// presence snapshot, then the event loop. A client reconnecting is just a
/// fresh connection; the dispatcher lets the newest one take over.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    // Step 2: Load pod membership and display name
    let db_lookup = db.clone();
    let uid = user_id.to_string();
    let user = match tokio::task::spawn_blocking(move || db_lookup.get_user_by_id(&uid)).await {
        Ok(Ok(Some(user))) => user,
        Ok(Ok(None)) => {
            warn!("Identified user {} no longer exists, closing", user_id);
            return;
        }
        Ok(Err(e)) => {
            warn!("User lookup failed for {}: {}", user_id, e);
            return;
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            return;
        }
    };

    let display_name = user.display_name.clone();
    let pod_id: Option<Uuid> = user.pod_id.as_deref().and_then(|p| p.parse().ok());

    info!("{} ({}) connected to gateway", display_name, user_id);

    // Step 3: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        display_name: display_name.clone(),
        pod_id,
    };
    let Ok(ready_json) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(ready_json.into())).await.is_err() {
        return;
    }

    // Step 4: Presence snapshot — who from my pod is already here
    if let Some(pod_id) = pod_id {
        for (uid, name) in dispatcher.online_in_pod(pod_id).await {
            let event = GatewayEvent::MemberOnline {
                pod_id,
                user_id: uid,
                display_name: name,
            };
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    // Step 5: Register presence (broadcasts MemberOnline to the room)
    let (conn_id, mut user_rx) = dispatcher
        .join(user_id, pod_id, display_name.clone())
        .await;

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_clone = dispatcher.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    // Room scoping: only my pod's events, and skip events I
                    // originated when the sender is excluded.
                    if msg.event.pod_id() != pod_id {
                        continue;
                    }
                    if msg.except_conn == Some(conn_id) {
                        continue;
                    }

                    let Ok(json) = serde_json::to_string(&msg.event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let display_name_recv = display_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &dispatcher_clone,
                            user_id,
                            conn_id,
                            pod_id,
                            &display_name_recv,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            display_name_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(conn_id).await;
    info!("{} ({}) disconnected from gateway", display_name, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Uuid> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use pact_types::api::Claims;

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    user_id: Uuid,
    conn_id: Uuid,
    pod_id: Option<Uuid>,
    display_name: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::StartTyping => {
            let Some(pod_id) = pod_id else {
                return;
            };
            dispatcher.broadcast_to_pod_except_sender(
                GatewayEvent::TypingStart {
                    pod_id,
                    user_id,
                    display_name: display_name.to_string(),
                },
                conn_id,
            );
        }
    }
}
