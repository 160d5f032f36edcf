use thiserror::Error;

/// Engine-level failure taxonomy. Every exceptional path in the
/// accountability engine resolves to one of these; none is fatal to the
/// server process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("caller is not authenticated")]
    Unauthorized,

    /// Caller does not belong to the referenced pod, or has no pod at all.
    #[error("caller does not belong to this pod")]
    InvalidPod,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Idempotent rejection: a check-in already exists for this user and
    /// calendar date. State is unchanged.
    #[error("a check-in already exists for this date")]
    DuplicateCheckIn,

    /// Restore limit reached for the current reset cycle.
    #[error("restore quota exhausted for this cycle")]
    QuotaExceeded,

    /// Synthetic-content provider failed or timed out. Always recovered
    /// locally via the static template tables, never surfaced to clients.
    #[error("support content provider unavailable")]
    UpstreamUnavailable,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable machine-readable code, included in error response bodies so
    /// clients can branch without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidPod => "invalid_pod",
            Self::NotFound(_) => "not_found",
            Self::DuplicateCheckIn => "duplicate_check_in",
            Self::QuotaExceeded => "quota_exceeded",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Storage(_) => "internal",
        }
    }
}
