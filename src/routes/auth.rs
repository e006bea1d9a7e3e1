use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::{bypass_role_from_env, signup_role_from_env, Principal};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::extract::Json;
use crate::models::rbac::{DbRole, Role};
use crate::models::user::{AuthResponse, DbUser, LoginRequest, MeResponse, RegisterRequest, User};
use crate::utils::{hash_password, utc_now, verify_password};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

/// Register a new account.
///
/// The very first user bootstraps into the bypass role so a fresh install
/// has an administrator; everyone after that gets the signup role.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    ensure_email_available(&state.pool, &payload.email).await?;

    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users")
        .fetch_one(&state.pool)
        .await?;
    let role_name = if user_count == 0 {
        bypass_role_from_env()
    } else {
        signup_role_from_env()
    };
    let role_id = role_id_by_name(&state.pool, &role_name).await?;

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();
    let user_id = uuid::Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role_id, department, active, \
         created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(password_hash)
    .bind(&role_id)
    .bind(&payload.department)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let db_user = fetch_user_by_id(&state.pool, user_id).await?;
    let user: User = db_user.try_into()?;
    let token = state.jwt.encode(user.id)?;

    log_activity_with_context(
        &state.event_bus,
        "registered",
        Some(user.id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, role_id, department, active, created_at, \
         updated_at FROM users WHERE email = ?",
    )
    .bind(&payload.email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let password_ok = verify_password(&payload.password, &db_user.password_hash)?;
    if !password_ok {
        return Err(AppError::unauthorized("invalid credentials"));
    }
    if db_user.active == 0 {
        return Err(AppError::unauthorized("user account is deactivated"));
    }

    let user: User = db_user.try_into()?;
    let token = state.jwt.encode(user.id)?;

    log_activity_with_context(
        &state.event_bus,
        "login",
        Some(user.id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(AuthResponse { token, user }))
}

/// Current user with their role and effective permission keys.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user and permission snapshot", body = MeResponse)),
    security(("bearerAuth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<MeResponse>> {
    let db_user = fetch_user_by_id(&state.pool, principal.user_id).await?;
    let user: User = db_user.try_into()?;

    let role: Role = sqlx::query_as::<_, DbRole>(
        "SELECT id, name, description, created_at, updated_at FROM roles WHERE id = ?",
    )
    .bind(principal.role_id.to_string())
    .fetch_one(&state.pool)
    .await?
    .try_into()?;

    Ok(Json(MeResponse {
        user,
        role,
        permissions: principal.held_permissions(),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged")),
    security(("bearerAuth" = []))
)]
pub async fn logout(_principal: Principal) -> AppResult<Json<MessageResponse>> {
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    Ok(())
}

async fn role_id_by_name(pool: &SqlitePool, name: &str) -> AppResult<String> {
    let role_id: Option<String> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    role_id.ok_or_else(|| {
        AppError::configuration(format!("role {name:?} is not provisioned, run the seeder"))
    })
}

async fn fetch_user_by_id(pool: &SqlitePool, user_id: uuid::Uuid) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, role_id, department, active, created_at, \
         updated_at FROM users WHERE id = ?",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))
}
