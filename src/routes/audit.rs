//! Audit Trail API Routes
//!
//! Read-only view over the `activity_log` projection for administrators.
//! Rows are written by the background listener, not by these handlers.

use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};

use crate::app::AppState;
use crate::authz::{permissions, Principal};
use crate::errors::AppError;
use crate::extract::Json;
use crate::models::audit::{ActivityLogEntry, ActivityLogQuery, DbActivityLogEntry};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

pub fn routes() -> Router<AppState> {
    Router::new().route("/activity-log", get(list_activity_log))
}

/// Recent activity log entries, newest first
#[utoipa::path(
    get,
    path = "/activity-log",
    tag = "Audit",
    params(
        ("event" = Option<String>, Query, description = "Filter by event name (e.g. report.approved)"),
        ("severity" = Option<String>, Query, description = "Filter by severity (critical, important, noise)"),
        ("limit" = Option<i64>, Query, description = "Max rows to return (default 100, cap 500)"),
    ),
    responses(
        (status = 200, description = "Activity log entries", body = Vec<ActivityLogEntry>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_activity_log(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ActivityLogQuery>,
) -> Result<Json<Vec<ActivityLogEntry>>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_ACTIVITY_LOG)
        .into_result()?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut conditions: Vec<&str> = Vec::new();
    if query.event.is_some() {
        conditions.push("event_name = ?");
    }
    if query.severity.is_some() {
        conditions.push("severity = ?");
    }

    let mut sql = String::from(
        "SELECT id, event_name, description, actor_id, subject_id, occurred_at, properties, \
         severity FROM activity_log",
    );
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY occurred_at DESC LIMIT ?");

    let mut db_query = sqlx::query_as::<_, DbActivityLogEntry>(&sql);
    if let Some(event) = &query.event {
        db_query = db_query.bind(event);
    }
    if let Some(severity) = &query.severity {
        db_query = db_query.bind(severity);
    }
    let rows = db_query.bind(limit).fetch_all(&state.pool).await?;

    let entries: Vec<ActivityLogEntry> = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(entries))
}
