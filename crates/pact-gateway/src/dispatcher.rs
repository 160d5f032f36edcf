use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use pact_types::events::GatewayEvent;

/// A pod-room event on the shared broadcast channel. Each connection
/// forwards only messages for its own pod, and skips messages originated by
/// itself when `except_conn` is set (typing indicators).
#[derive(Debug, Clone)]
pub struct RoomMessage {
    pub event: GatewayEvent,
    pub except_conn: Option<Uuid>,
}

/// Presence record for one connected user.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub conn_id: Uuid,
    pub pod_id: Option<Uuid>,
    pub display_name: String,
}

/// Manages all connected clients and fans events out to pod rooms.
///
/// State is held in memory for the lifetime of this process; the dispatcher
/// is created once in `main` and injected everywhere it is needed. Scaling
/// past one instance would require replicating room membership over an
/// external pub/sub fabric.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for room events — connections filter by pod.
    broadcast_tx: broadcast::Sender<RoomMessage>,

    /// user_id -> presence
    presence: RwLock<HashMap<Uuid, PresenceEntry>>,

    /// conn_id -> user_id, for disconnects keyed by connection.
    connections: RwLock<HashMap<Uuid, Uuid>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: RwLock::new(HashMap::new()),
                connections: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to room events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Deliver an event to every connection in its pod room. A send failure
    /// here means no subscriber exists, which is fine — state changes are
    /// committed before fanout and clients reconcile by refetching.
    pub fn broadcast_to_pod(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(RoomMessage {
            event,
            except_conn: None,
        });
    }

    /// Same as [`broadcast_to_pod`](Self::broadcast_to_pod) but skips the
    /// originating connection.
    pub fn broadcast_to_pod_except_sender(&self, event: GatewayEvent, sender_conn: Uuid) {
        let _ = self.inner.broadcast_tx.send(RoomMessage {
            event,
            except_conn: Some(sender_conn),
        });
    }

    /// Send a targeted event to a specific user.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Register a user's presence. Returns the connection id and the
    /// targeted-event receiver, and emits a pod-scoped online event.
    /// A reconnect simply takes over: the newest connection owns the entry.
    pub async fn join(
        &self,
        user_id: Uuid,
        pod_id: Option<Uuid>,
        display_name: String,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        self.inner.connections.write().await.insert(conn_id, user_id);
        self.inner.presence.write().await.insert(
            user_id,
            PresenceEntry {
                conn_id,
                pod_id,
                display_name: display_name.clone(),
            },
        );

        if let Some(pod_id) = pod_id {
            self.broadcast_to_pod(GatewayEvent::MemberOnline {
                pod_id,
                user_id,
                display_name,
            });
        }

        (conn_id, rx)
    }

    /// Remove presence for a closed connection and emit the offline event.
    /// Only cleans up if this connection still owns the user's entry — a
    /// newer connection may have superseded it.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let user_id = match self.inner.connections.write().await.remove(&conn_id) {
            Some(uid) => uid,
            None => return,
        };

        let entry = {
            let mut presence = self.inner.presence.write().await;
            match presence.get(&user_id) {
                Some(e) if e.conn_id == conn_id => presence.remove(&user_id),
                _ => None,
            }
        };

        {
            let mut channels = self.inner.user_channels.write().await;
            if let Some((owner, _)) = channels.get(&user_id) {
                if *owner == conn_id {
                    channels.remove(&user_id);
                }
            }
        }

        if let Some(entry) = entry {
            if let Some(pod_id) = entry.pod_id {
                self.broadcast_to_pod(GatewayEvent::MemberOffline {
                    pod_id,
                    user_id,
                    display_name: entry.display_name,
                });
            }
        }
    }

    /// Currently-connected members of a pod.
    pub async fn online_in_pod(&self, pod_id: Uuid) -> Vec<(Uuid, String)> {
        self.inner
            .presence
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.pod_id == Some(pod_id))
            .map(|(id, e)| (*id, e.display_name.clone()))
            .collect()
    }

    /// Whether the user has a live gateway connection right now.
    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.presence.read().await.contains_key(&user_id)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_emits_online_and_tracks_presence() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let pod = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (conn, _user_rx) = dispatcher.join(user, Some(pod), "Ana".into()).await;

        let msg = rx.recv().await.unwrap();
        match msg.event {
            GatewayEvent::MemberOnline { pod_id, user_id, .. } => {
                assert_eq!(pod_id, pod);
                assert_eq!(user_id, user);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        assert!(dispatcher.is_online(user).await);
        assert_eq!(dispatcher.online_in_pod(pod).await.len(), 1);

        dispatcher.disconnect(conn).await;
        assert!(!dispatcher.is_online(user).await);
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg.event, GatewayEvent::MemberOffline { .. }));
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_new_connection() {
        let dispatcher = Dispatcher::new();
        let pod = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (old_conn, _rx1) = dispatcher.join(user, Some(pod), "Ana".into()).await;
        let (_new_conn, _rx2) = dispatcher.join(user, Some(pod), "Ana".into()).await;

        // The old connection closing must not remove the new presence.
        dispatcher.disconnect(old_conn).await;
        assert!(dispatcher.is_online(user).await);
    }

    #[tokio::test]
    async fn presence_is_scoped_per_pod() {
        let dispatcher = Dispatcher::new();
        let pod_a = Uuid::new_v4();
        let pod_b = Uuid::new_v4();

        let (_c1, _r1) = dispatcher.join(Uuid::new_v4(), Some(pod_a), "Ana".into()).await;
        let (_c2, _r2) = dispatcher.join(Uuid::new_v4(), Some(pod_b), "Ben".into()).await;
        let (_c3, _r3) = dispatcher.join(Uuid::new_v4(), None, "Cal".into()).await;

        assert_eq!(dispatcher.online_in_pod(pod_a).await.len(), 1);
        assert_eq!(dispatcher.online_in_pod(pod_b).await.len(), 1);
    }

    #[tokio::test]
    async fn targeted_send_reaches_only_the_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_conn, mut user_rx) = dispatcher.join(user, None, "Ana".into()).await;

        dispatcher
            .send_to_user(
                user,
                GatewayEvent::Ready {
                    user_id: user,
                    display_name: "Ana".into(),
                    pod_id: None,
                },
            )
            .await;

        let event = user_rx.recv().await.unwrap();
        assert!(matches!(event, GatewayEvent::Ready { .. }));
    }
}
