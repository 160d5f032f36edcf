use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway. Every pod-scoped event carries
/// the pod id plus enough identifying fields (user id, new streak, alert id)
/// for a client to reconcile local state without a full refetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready {
        user_id: Uuid,
        display_name: String,
        pod_id: Option<Uuid>,
    },

    /// A pod member connected to the gateway.
    MemberOnline {
        pod_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    /// A pod member disconnected.
    MemberOffline {
        pod_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    /// A member's streak changed (check-in, restore, or decay sweep).
    StreakUpdate {
        pod_id: Uuid,
        user_id: Uuid,
        current_streak: i64,
        streak_broken: bool,
    },

    /// The pod's denormalized total was recomputed.
    PodUpdate { pod_id: Uuid, total_streak: i64 },

    /// A new pod was formed and the recipient is a member of it.
    PodAssigned {
        pod_id: Uuid,
        pod_name: String,
        user_id: Uuid,
    },

    /// A member raised a crisis alert.
    CrisisAlertCreate {
        pod_id: Uuid,
        alert_id: Uuid,
        user_id: Uuid,
        display_name: String,
        message: Option<String>,
        created_at: DateTime<Utc>,
    },

    /// A member responded to an active alert.
    CrisisAlertResponse {
        pod_id: Uuid,
        alert_id: Uuid,
        user_id: Uuid,
        display_name: String,
        response_count: i64,
    },

    /// An alert was resolved (terminal).
    CrisisAlertResolve {
        pod_id: Uuid,
        alert_id: Uuid,
        resolved_by: Uuid,
    },

    /// A member started typing in the pod room.
    TypingStart {
        pod_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },
}

impl GatewayEvent {
    /// Returns the pod id if this event is scoped to a pod room.
    /// Events that return `None` are delivered only over targeted sends.
    pub fn pod_id(&self) -> Option<Uuid> {
        match self {
            Self::MemberOnline { pod_id, .. } => Some(*pod_id),
            Self::MemberOffline { pod_id, .. } => Some(*pod_id),
            Self::StreakUpdate { pod_id, .. } => Some(*pod_id),
            Self::PodUpdate { pod_id, .. } => Some(*pod_id),
            Self::PodAssigned { pod_id, .. } => Some(*pod_id),
            Self::CrisisAlertCreate { pod_id, .. } => Some(*pod_id),
            Self::CrisisAlertResponse { pod_id, .. } => Some(*pod_id),
            Self::CrisisAlertResolve { pod_id, .. } => Some(*pod_id),
            Self::TypingStart { pod_id, .. } => Some(*pod_id),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection.
    Identify { token: String },

    /// Indicate typing in the pod room. Fanned out to everyone in the room
    /// except the sender.
    StartTyping,
}
