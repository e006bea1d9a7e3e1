//! Plan Catalog API Routes
//!
//! Activities and indicators are the two kinds of target a progress report
//! can point at. The catalog is small on purpose: list, create, get.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{permissions, Principal};
use crate::errors::AppError;
use crate::events::{log_activity_with_context, RequestContext};
use crate::extract::Json;
use crate::models::plan::{
    Activity, ActivityCreateRequest, DbActivity, DbIndicator, Indicator, IndicatorCreateRequest,
};
use crate::utils::utc_now;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/activities", get(list_activities).post(create_activity))
        .route("/activities/:activity_id", get(get_activity))
        .route("/indicators", get(list_indicators).post(create_indicator))
        .route("/indicators/:indicator_id", get(get_indicator))
}

// =============================================================================
// ACTIVITY ENDPOINTS
// =============================================================================

/// List all activities
#[utoipa::path(
    get,
    path = "/activities",
    tag = "Plan",
    responses(
        (status = 200, description = "List of activities", body = Vec<Activity>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_activities(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Activity>>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_ACTIVITY)
        .into_result()?;

    let rows = sqlx::query_as::<_, DbActivity>(
        "SELECT id, name, description, created_at, updated_at FROM activities ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let activities: Vec<Activity> = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(activities))
}

/// Create an activity
#[utoipa::path(
    post,
    path = "/activities",
    tag = "Plan",
    request_body = ActivityCreateRequest,
    responses(
        (status = 201, description = "Activity created", body = Activity),
        (status = 400, description = "Name must not be empty"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_activity(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Json(req): Json<ActivityCreateRequest>,
) -> Result<(StatusCode, Json<Activity>), AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::CREATE_ACTIVITY)
        .into_result()?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("activity name must not be empty"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO activities (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&name)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let activity = Activity {
        id,
        name,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &activity,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(activity)))
}

/// Get an activity by ID
#[utoipa::path(
    get,
    path = "/activities/{activity_id}",
    tag = "Plan",
    params(
        ("activity_id" = Uuid, Path, description = "Activity ID"),
    ),
    responses(
        (status = 200, description = "Activity details", body = Activity),
        (status = 404, description = "Activity not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_activity(
    State(state): State<AppState>,
    principal: Principal,
    Path(activity_id): Path<Uuid>,
) -> Result<Json<Activity>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_ACTIVITY)
        .into_result()?;

    let row = sqlx::query_as::<_, DbActivity>(
        "SELECT id, name, description, created_at, updated_at FROM activities WHERE id = ?",
    )
    .bind(activity_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Activity not found"))?;

    Ok(Json(row.try_into()?))
}

// =============================================================================
// INDICATOR ENDPOINTS
// =============================================================================

/// List all indicators
#[utoipa::path(
    get,
    path = "/indicators",
    tag = "Plan",
    responses(
        (status = 200, description = "List of indicators", body = Vec<Indicator>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_indicators(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Indicator>>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_INDICATOR)
        .into_result()?;

    let rows = sqlx::query_as::<_, DbIndicator>(
        "SELECT id, name, measurement_unit, created_at, updated_at FROM indicators ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let indicators: Vec<Indicator> = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(indicators))
}

/// Create an indicator
#[utoipa::path(
    post,
    path = "/indicators",
    tag = "Plan",
    request_body = IndicatorCreateRequest,
    responses(
        (status = 201, description = "Indicator created", body = Indicator),
        (status = 400, description = "Name must not be empty"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_indicator(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Json(req): Json<IndicatorCreateRequest>,
) -> Result<(StatusCode, Json<Indicator>), AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::CREATE_INDICATOR)
        .into_result()?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("indicator name must not be empty"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO indicators (id, name, measurement_unit, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&name)
    .bind(&req.measurement_unit)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let indicator = Indicator {
        id,
        name,
        measurement_unit: req.measurement_unit,
        created_at: now,
        updated_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &indicator,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(indicator)))
}

/// Get an indicator by ID
#[utoipa::path(
    get,
    path = "/indicators/{indicator_id}",
    tag = "Plan",
    params(
        ("indicator_id" = Uuid, Path, description = "Indicator ID"),
    ),
    responses(
        (status = 200, description = "Indicator details", body = Indicator),
        (status = 404, description = "Indicator not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_indicator(
    State(state): State<AppState>,
    principal: Principal,
    Path(indicator_id): Path<Uuid>,
) -> Result<Json<Indicator>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_INDICATOR)
        .into_result()?;

    let row = sqlx::query_as::<_, DbIndicator>(
        "SELECT id, name, measurement_unit, created_at, updated_at FROM indicators WHERE id = ?",
    )
    .bind(indicator_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Indicator not found"))?;

    Ok(Json(row.try_into()?))
}
