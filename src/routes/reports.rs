//! Progress Report API Routes
//!
//! Thin HTTP layer over the approval workflow. Creation, editing and the
//! four lifecycle transitions all delegate to `workflow::service`, which
//! owns validation, the status/ledger transaction and notification
//! fan-out. Reads are gated here: a reporter can always see their own
//! reports, anything wider needs `read:progress-report`.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{permissions, Principal};
use crate::errors::AppError;
use crate::events::RequestContext;
use crate::extract::Json;
use crate::models::report::{
    ApprovalHistoryEntry, ProgressReport, ReportCreateRequest, ReportListQuery, ReportStatus,
    ReportUpdateRequest, TransitionRequest,
};
use crate::workflow::{self, ledger, TransitionAction};

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reports).post(create_report))
        .route("/:report_id", get(get_report).put(update_report))
        .route("/:report_id/history", get(get_report_history))
        .route("/:report_id/submit", post(submit_report))
        .route("/:report_id/approve", post(approve_report))
        .route("/:report_id/reject", post(reject_report))
        .route("/:report_id/resubmit", post(resubmit_report))
}

// =============================================================================
// CRUD ENDPOINTS
// =============================================================================

/// Create a progress report (DRAFT by default, SUBMITTED for direct submission)
#[utoipa::path(
    post,
    path = "/reports",
    tag = "Reports",
    request_body = ReportCreateRequest,
    responses(
        (status = 201, description = "Report created", body = ProgressReport),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Referenced activity or indicator not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_report(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Json(req): Json<ReportCreateRequest>,
) -> Result<(StatusCode, Json<ProgressReport>), AppError> {
    let report = workflow::create_report(
        &state,
        &principal,
        req,
        Some(RequestContext::from_headers(&headers)),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(report)))
}

/// List progress reports
#[utoipa::path(
    get,
    path = "/reports",
    tag = "Reports",
    params(
        ("status" = Option<String>, Query, description = "Filter by status (DRAFT, SUBMITTED, APPROVED, REJECTED)"),
        ("mine" = Option<bool>, Query, description = "Only the caller's own reports"),
    ),
    responses(
        (status = 200, description = "List of reports", body = Vec<ProgressReport>),
        (status = 400, description = "Unknown status filter"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_reports(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ReportListQuery>,
) -> Result<Json<Vec<ProgressReport>>, AppError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            ReportStatus::parse(raw)
                .map_err(|_| AppError::bad_request(format!("unknown status filter {raw:?}")))?,
        ),
        None => None,
    };

    // Own reports are always visible; the full listing needs read access.
    let mine = query.mine.unwrap_or(false);
    if !mine {
        state
            .evaluator
            .authorize(&principal, permissions::READ_PROGRESS_REPORT)
            .into_result()?;
    }

    let reports = workflow::list_reports(
        &state,
        workflow::ReportFilter {
            status,
            reported_by: mine.then_some(principal.user_id),
        },
    )
    .await?;

    Ok(Json(reports))
}

/// Get a single progress report
#[utoipa::path(
    get,
    path = "/reports/{report_id}",
    tag = "Reports",
    params(
        ("report_id" = Uuid, Path, description = "Report ID"),
    ),
    responses(
        (status = 200, description = "Report details", body = ProgressReport),
        (status = 404, description = "Report not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_report(
    State(state): State<AppState>,
    principal: Principal,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ProgressReport>, AppError> {
    let report = workflow::fetch_report(&state, report_id).await?;
    if report.reported_by != principal.user_id {
        state
            .evaluator
            .authorize(&principal, permissions::READ_PROGRESS_REPORT)
            .into_result()?;
    }

    Ok(Json(report))
}

/// Edit a DRAFT or REJECTED report. Only the reporting user can edit.
#[utoipa::path(
    put,
    path = "/reports/{report_id}",
    tag = "Reports",
    params(
        ("report_id" = Uuid, Path, description = "Report ID"),
    ),
    request_body = ReportUpdateRequest,
    responses(
        (status = 200, description = "Report updated", body = ProgressReport),
        (status = 403, description = "Caller is not the reporting user"),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report is not editable in its current status"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_report(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(report_id): Path<Uuid>,
    Json(req): Json<ReportUpdateRequest>,
) -> Result<Json<ProgressReport>, AppError> {
    let report = workflow::update_report(
        &state,
        &principal,
        report_id,
        req,
        Some(RequestContext::from_headers(&headers)),
    )
    .await?;

    Ok(Json(report))
}

/// Approval history for a report, oldest entry first
#[utoipa::path(
    get,
    path = "/reports/{report_id}/history",
    tag = "Reports",
    params(
        ("report_id" = Uuid, Path, description = "Report ID"),
    ),
    responses(
        (status = 200, description = "Ledger entries in commit order", body = Vec<ApprovalHistoryEntry>),
        (status = 404, description = "Report not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_report_history(
    State(state): State<AppState>,
    principal: Principal,
    Path(report_id): Path<Uuid>,
) -> Result<Json<Vec<ApprovalHistoryEntry>>, AppError> {
    let report = workflow::fetch_report(&state, report_id).await?;
    if report.reported_by != principal.user_id {
        state
            .evaluator
            .authorize(&principal, permissions::READ_PROGRESS_REPORT)
            .into_result()?;
    }

    let entries = ledger::history_for(&state.pool, report_id).await?;
    Ok(Json(entries))
}

// =============================================================================
// TRANSITION ENDPOINTS
// =============================================================================

/// Submit a DRAFT report for approval
#[utoipa::path(
    post,
    path = "/reports/{report_id}/submit",
    tag = "Reports",
    params(
        ("report_id" = Uuid, Path, description = "Report ID"),
    ),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Report submitted", body = ProgressReport),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report is not in DRAFT"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn submit_report(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(report_id): Path<Uuid>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<ProgressReport>, AppError> {
    transition(
        state,
        principal,
        headers,
        report_id,
        TransitionAction::Submit,
        body,
    )
    .await
}

/// Approve a SUBMITTED report
#[utoipa::path(
    post,
    path = "/reports/{report_id}/approve",
    tag = "Reports",
    params(
        ("report_id" = Uuid, Path, description = "Report ID"),
    ),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Report approved", body = ProgressReport),
        (status = 403, description = "Missing permission or the caller submitted the report"),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report is not in SUBMITTED"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn approve_report(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(report_id): Path<Uuid>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<ProgressReport>, AppError> {
    transition(
        state,
        principal,
        headers,
        report_id,
        TransitionAction::Approve,
        body,
    )
    .await
}

/// Reject a SUBMITTED report
#[utoipa::path(
    post,
    path = "/reports/{report_id}/reject",
    tag = "Reports",
    params(
        ("report_id" = Uuid, Path, description = "Report ID"),
    ),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Report rejected", body = ProgressReport),
        (status = 403, description = "Missing permission or the caller submitted the report"),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report is not in SUBMITTED"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn reject_report(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(report_id): Path<Uuid>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<ProgressReport>, AppError> {
    transition(
        state,
        principal,
        headers,
        report_id,
        TransitionAction::Reject,
        body,
    )
    .await
}

/// Resubmit a REJECTED report after editing
#[utoipa::path(
    post,
    path = "/reports/{report_id}/resubmit",
    tag = "Reports",
    params(
        ("report_id" = Uuid, Path, description = "Report ID"),
    ),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Report resubmitted", body = ProgressReport),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report is not in REJECTED"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn resubmit_report(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(report_id): Path<Uuid>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<ProgressReport>, AppError> {
    transition(
        state,
        principal,
        headers,
        report_id,
        TransitionAction::Resubmit,
        body,
    )
    .await
}

async fn transition(
    state: AppState,
    principal: Principal,
    headers: HeaderMap,
    report_id: Uuid,
    action: TransitionAction,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<ProgressReport>, AppError> {
    let comment = body
        .and_then(|Json(req)| req.comment)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let outcome = workflow::execute_transition(
        &state,
        report_id,
        action,
        &principal,
        comment,
        Some(RequestContext::from_headers(&headers)),
    )
    .await?;

    Ok(Json(outcome.report))
}
