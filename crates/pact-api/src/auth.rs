use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::error;
use uuid::Uuid;

use pact_core::availability::parse_hhmm;
use pact_core::streak::next_quota_reset;
use pact_db::Database;
use pact_gateway::dispatcher::Dispatcher;
use pact_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use pact_types::models::User;

use crate::error::ApiError;
use crate::load_user;
use crate::support_content::SupportContentClient;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub support: SupportContentClient,
}

/// Default active-hours window for accounts that don't state one: 09:00–21:00.
const DEFAULT_AVAILABILITY: (i64, i64) = (540, 1260);

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (start, end) = match (&req.availability_start, &req.availability_end) {
        (Some(s), Some(e)) => {
            let s = parse_hhmm(s).ok_or(StatusCode::BAD_REQUEST)?;
            let e = parse_hhmm(e).ok_or(StatusCode::BAD_REQUEST)?;
            (s as i64, e as i64)
        }
        (None, None) => DEFAULT_AVAILABILITY,
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    let tz_offset = req.tz_offset_minutes.unwrap_or(0);
    // UTC-12:00 through UTC+14:00
    if !(-720..=840).contains(&tz_offset) {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Check if username is taken
    let db = state.db.clone();
    let username = req.username.clone();
    let existing = tokio::task::spawn_blocking(move || db.get_user_by_username(&username))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if existing.is_some() {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    let user_id = Uuid::new_v4();
    let display_name = req
        .display_name
        .clone()
        .unwrap_or_else(|| req.username.clone());
    let restores_reset_at = next_quota_reset(chrono::Utc::now()).to_rfc3339();

    let db = state.db.clone();
    let username = req.username.clone();
    let goal_category = req.goal_category.clone();
    tokio::task::spawn_blocking(move || {
        db.create_user(
            &user_id.to_string(),
            &username,
            &password_hash,
            &display_name,
            start,
            end,
            tz_offset as i64,
            goal_category.as_deref(),
            &restores_reset_at,
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let username = req.username.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_username(&username))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// The caller's own profile, including streak and restore-quota state.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let row = load_user(&state, claims.sub).await?;
    let now = chrono::Utc::now();

    let user = User {
        id: claims.sub,
        username: row.username.clone(),
        display_name: row.display_name.clone(),
        pod_id: row.pod_id.as_deref().and_then(|p| p.parse().ok()),
        current_streak: row.current_streak,
        last_check_in: row.last_check_in_date(),
        last_successful_day: row.last_successful_day_date(),
        availability_start_minute: row.availability_start_minute as u16,
        availability_end_minute: row.availability_end_minute as u16,
        tz_offset_minutes: row.tz_offset_minutes as i32,
        availability_message: row.availability_message.clone(),
        restores_used_this_month: row.restores_used_this_month,
        restores_reset_at: row.restores_reset_at_ts().unwrap_or(now),
        is_synthetic: row.is_synthetic,
        goal_category: row.goal_category.clone(),
        created_at: row.created_at_ts().unwrap_or(now),
    };

    Ok(Json(user))
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
