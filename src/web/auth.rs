use crate::db;
use crate::domain::answer::is_valid_email;
use crate::domain::models::User;
use crate::middleware::{client_ip, RateLimiter};
use crate::state::SharedState;
use crate::web::session::{self, UserSession};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 8;

// 5 attempts per minute per IP
static LOGIN_RATE_LIMITER: Lazy<RateLimiter> = Lazy::new(|| RateLimiter::new(5, 60));

pub fn login_limiter() -> &'static RateLimiter {
    &LOGIN_RATE_LIMITER
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub session_expires_at: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            created_at: user.created_at,
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(state)
}

fn cookie_headers(cookie: String) -> Result<HeaderMap, StatusCode> {
    let value = HeaderValue::from_str(&cookie).map_err(|e| {
        tracing::error!("Invalid Set-Cookie value: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}

fn issue_session(state: &SharedState, user_id: Uuid) -> Result<HeaderMap, StatusCode> {
    let token = session::sign_session(user_id, &state.session_key).map_err(|e| {
        tracing::error!("Failed to sign session: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    cookie_headers(session::session_cookie(&token, state.config.cookie_secure))
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|db_err| db_err.is_unique_violation())
}

async fn register(
    State(state): State<SharedState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let email = payload.email.trim().to_lowercase();
    if !is_valid_email(&email) || payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    let display_name = payload
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!("Password hashing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .to_string();

    let user = db::create_user(&state.pool, &email, &hash, &display_name)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StatusCode::CONFLICT
            } else {
                tracing::error!("Failed to create user: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    tracing::info!("Registered user {}", user.id);
    let headers = issue_session(&state, user.id)?;
    Ok((StatusCode::CREATED, headers, Json(UserResponse::from(user))))
}

async fn login(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<SharedState>,
    request_headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let ip = client_ip(&request_headers, connect_info.map(|ConnectInfo(addr)| addr));
    if !LOGIN_RATE_LIMITER.check(&ip).await {
        tracing::warn!("Login rate limit exceeded for IP: {}", ip);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    let email = payload.email.trim().to_lowercase();
    let user = db::find_user_by_email(&state.pool, &email)
        .await
        .map_err(|e| {
            tracing::error!("User lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let parsed_hash = PasswordHash::new(&user.hash).map_err(|_| StatusCode::UNAUTHORIZED)?;
    Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let headers = issue_session(&state, user.id)?;
    tracing::info!("User {} logged in", user.id);
    Ok((headers, Json(UserResponse::from(user))))
}

async fn logout(State(state): State<SharedState>) -> Result<impl IntoResponse, StatusCode> {
    let headers = cookie_headers(session::clear_session_cookie(state.config.cookie_secure))?;
    Ok((StatusCode::NO_CONTENT, headers))
}

async fn me(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, StatusCode> {
    let user = db::find_user_by_id(&state.pool, user_id)
        .await
        .map_err(|e| {
            tracing::error!("User lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;
    Ok(Json(MeResponse {
        user: UserResponse::from(user),
        session_expires_at: session_expiry(&headers, &state.session_key),
    }))
}

fn session_expiry(headers: &HeaderMap, key: &[u8]) -> Option<DateTime<Utc>> {
    let token = session::extract_token(headers)?;
    session::verify_session(&token, key).ok()?.expires_at()
}
