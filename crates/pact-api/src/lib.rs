pub mod auth;
pub mod checkins;
pub mod crisis;
pub mod error;
pub mod middleware;
pub mod pods;
pub mod restores;
pub mod support_content;

use pact_db::models::UserRow;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::ApiError;
use pact_types::error::EngineError;

/// Fetch a user row off the async runtime, mapping absence to `NotFound`.
pub(crate) async fn load_user(state: &AppState, user_id: Uuid) -> Result<UserRow, ApiError> {
    let db = state.db.clone();
    let id = user_id.to_string();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(&id))
        .await
        .map_err(|e| ApiError::from(anyhow::anyhow!("spawn_blocking join error: {e}")))??
        .ok_or(EngineError::NotFound("user"))?;
    Ok(user)
}
