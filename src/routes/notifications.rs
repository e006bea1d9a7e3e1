//! Notification API Routes
//!
//! Every endpoint is scoped to the authenticated user's own notifications,
//! so none of them carries a permission gate.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::Principal;
use crate::errors::AppError;
use crate::extract::Json;
use crate::models::notification::{
    DbNotification, Notification, NotificationListQuery, UnreadCountResponse,
};

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/:notification_id/read", post(mark_read))
        .route("/read-all", post(mark_all_read))
}

// =============================================================================
// ENDPOINTS
// =============================================================================

/// List the caller's notifications, newest first
#[utoipa::path(
    get,
    path = "/notifications",
    tag = "Notifications",
    params(
        ("unread" = Option<bool>, Query, description = "Only unread notifications"),
    ),
    responses(
        (status = 200, description = "Notifications for the caller", body = Vec<Notification>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let mut sql = String::from(
        "SELECT id, user_id, title, message, severity, read, created_at \
         FROM notifications WHERE user_id = ?",
    );
    if query.unread.unwrap_or(false) {
        sql.push_str(" AND read = 0");
    }
    sql.push_str(" ORDER BY created_at DESC");

    let rows = sqlx::query_as::<_, DbNotification>(&sql)
        .bind(principal.user_id.to_string())
        .fetch_all(&state.pool)
        .await?;

    let notifications: Vec<Notification> = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(notifications))
}

/// Count of unread notifications for the caller
#[utoipa::path(
    get,
    path = "/notifications/unread-count",
    tag = "Notifications",
    responses(
        (status = 200, description = "Unread count", body = UnreadCountResponse),
    ),
    security(("bearerAuth" = []))
)]
pub async fn unread_count(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let unread: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM notifications WHERE user_id = ? AND read = 0",
    )
    .bind(principal.user_id.to_string())
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(UnreadCountResponse { unread }))
}

/// Mark one of the caller's notifications as read
#[utoipa::path(
    post,
    path = "/notifications/{notification_id}/read",
    tag = "Notifications",
    params(
        ("notification_id" = Uuid, Path, description = "Notification ID"),
    ),
    responses(
        (status = 204, description = "Notification marked as read"),
        (status = 404, description = "Notification not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    // Scoping by user_id keeps one user from touching another's inbox.
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ? AND user_id = ?")
        .bind(notification_id.to_string())
        .bind(principal.user_id.to_string())
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Notification not found"));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Mark all of the caller's notifications as read
#[utoipa::path(
    post,
    path = "/notifications/read-all",
    tag = "Notifications",
    responses(
        (status = 204, description = "All notifications marked as read"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<StatusCode, AppError> {
    sqlx::query("UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0")
        .bind(principal.user_id.to_string())
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
