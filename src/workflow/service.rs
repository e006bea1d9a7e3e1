//! Report workflow orchestration.
//!
//! Handlers call into this module; it owns the validation order, the
//! status-plus-ledger transaction, and the post-commit side effects.
//! Order for a transition: replay the ledger, check legality, check
//! permission, check the actor rule, then commit. Notifications and
//! activity logging happen only after the commit.

use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{permissions, Principal};
use crate::errors::AppError;
use crate::events::{log_activity_with_context, RequestContext, Severity};
use crate::models::report::{
    ApprovalAction, ApprovalHistoryEntry, DbProgressReport, ProgressReport, ReportCreateRequest,
    ReportStatus, ReportUpdateRequest,
};
use crate::utils::{execution_percentage, utc_now};
use crate::workflow::ledger;
use crate::workflow::lifecycle::{self, ActorRule, TransitionAction};

const REPORT_COLUMNS: &str = "id, activity_id, indicator_id, period_type, period, current_value, \
     target_value, execution_percentage, comments, challenges, next_steps, reported_by, status, \
     created_at, updated_at";

pub struct TransitionOutcome {
    pub report: ProgressReport,
    pub entry: ApprovalHistoryEntry,
}

#[derive(Debug, Default)]
pub struct ReportFilter {
    pub status: Option<ReportStatus>,
    pub reported_by: Option<Uuid>,
}

pub async fn list_reports(
    state: &AppState,
    filter: ReportFilter,
) -> Result<Vec<ProgressReport>, AppError> {
    let mut conditions: Vec<&str> = Vec::new();
    if filter.status.is_some() {
        conditions.push("status = ?");
    }
    if filter.reported_by.is_some() {
        conditions.push("reported_by = ?");
    }

    let mut sql = format!("SELECT {REPORT_COLUMNS} FROM progress_reports");
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut query = sqlx::query_as::<_, DbProgressReport>(&sql);
    if let Some(status) = filter.status {
        query = query.bind(status.as_str());
    }
    if let Some(reporter) = filter.reported_by {
        query = query.bind(reporter.to_string());
    }

    let rows = query.fetch_all(&state.pool).await?;
    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn fetch_report(state: &AppState, report_id: Uuid) -> Result<ProgressReport, AppError> {
    let row = sqlx::query_as::<_, DbProgressReport>(&format!(
        "SELECT {REPORT_COLUMNS} FROM progress_reports WHERE id = ?"
    ))
    .bind(report_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Report not found"))?;

    row.try_into()
}

/// Creates a report in DRAFT, or directly in SUBMITTED when the request
/// asks for it. Direct submission appends CREATED and SUBMITTED to the
/// ledger in the same transaction as the report row.
pub async fn create_report(
    state: &AppState,
    actor: &Principal,
    req: ReportCreateRequest,
    context: Option<RequestContext>,
) -> Result<ProgressReport, AppError> {
    state
        .evaluator
        .authorize(actor, permissions::CREATE_PROGRESS_REPORT)
        .into_result()?;

    let initial = match req.status.unwrap_or(ReportStatus::Draft) {
        ReportStatus::Draft => ReportStatus::Draft,
        ReportStatus::Submitted => ReportStatus::Submitted,
        other => {
            return Err(AppError::bad_request(format!(
                "a report cannot be created in status {other}"
            )))
        }
    };

    validate_target(state, req.activity_id, req.indicator_id, true).await?;

    let period_type = req.period_type.trim().to_string();
    let period = req.period.trim().to_string();
    if period_type.is_empty() || period.is_empty() {
        return Err(AppError::bad_request("period_type and period are required"));
    }

    let percentage = derived_percentage(req.current_value, req.target_value);

    let report_id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO progress_reports (id, activity_id, indicator_id, period_type, period, \
         current_value, target_value, execution_percentage, comments, challenges, next_steps, \
         reported_by, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(report_id.to_string())
    .bind(req.activity_id.map(|id| id.to_string()))
    .bind(req.indicator_id.map(|id| id.to_string()))
    .bind(&period_type)
    .bind(&period)
    .bind(req.current_value)
    .bind(req.target_value)
    .bind(percentage)
    .bind(&req.comments)
    .bind(&req.challenges)
    .bind(&req.next_steps)
    .bind(actor.user_id.to_string())
    .bind(initial.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    ledger::append(&mut tx, report_id, ApprovalAction::Created, actor.user_id, None, now).await?;
    if initial == ReportStatus::Submitted {
        ledger::append(&mut tx, report_id, ApprovalAction::Submitted, actor.user_id, None, now)
            .await?;
    }

    tx.commit().await?;

    let report = fetch_report(state, report_id).await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(actor.user_id),
        &report,
        None,
        context.clone(),
    );

    if initial == ReportStatus::Submitted {
        notify_approvers(state, actor, &report, false).await;
        log_activity_with_context(
            &state.event_bus,
            "submitted",
            Some(actor.user_id),
            &report,
            None,
            context,
        );
    }

    Ok(report)
}

/// Edits a DRAFT or REJECTED report. Only the reporting user may edit;
/// approval transitions are handled by [`execute_transition`], never here.
pub async fn update_report(
    state: &AppState,
    actor: &Principal,
    report_id: Uuid,
    req: ReportUpdateRequest,
    context: Option<RequestContext>,
) -> Result<ProgressReport, AppError> {
    let existing = fetch_report(state, report_id).await?;

    if existing.reported_by != actor.user_id {
        return Err(AppError::forbidden(
            "only the reporting user can edit this report",
        ));
    }
    if !matches!(existing.status, ReportStatus::Draft | ReportStatus::Rejected) {
        return Err(AppError::conflict(format!(
            "a report in status {} cannot be edited",
            existing.status
        )));
    }

    state
        .evaluator
        .authorize_any(
            actor,
            &[
                permissions::CREATE_PROGRESS_REPORT,
                permissions::UPDATE_PROGRESS_REPORT,
            ],
        )
        .into_result()?;

    // Retarget only when the request names a new target; naming both is
    // the same both-set shape the create path rejects.
    let (activity_id, indicator_id) = match (req.activity_id, req.indicator_id) {
        (Some(_), Some(_)) => {
            return Err(AppError::bad_request(
                "a report must reference exactly one of activity_id or indicator_id",
            ))
        }
        (Some(activity), None) => (Some(activity), None),
        (None, Some(indicator)) => (None, Some(indicator)),
        (None, None) => (existing.activity_id, existing.indicator_id),
    };
    validate_target(state, activity_id, indicator_id, false).await?;

    let period_type = match req.period_type {
        Some(value) if value.trim().is_empty() => {
            return Err(AppError::bad_request("period_type cannot be empty"))
        }
        Some(value) => value.trim().to_string(),
        None => existing.period_type.clone(),
    };
    let period = match req.period {
        Some(value) if value.trim().is_empty() => {
            return Err(AppError::bad_request("period cannot be empty"))
        }
        Some(value) => value.trim().to_string(),
        None => existing.period.clone(),
    };

    let current_value = req.current_value.or(existing.current_value);
    let target_value = req.target_value.or(existing.target_value);
    let percentage = derived_percentage(current_value, target_value);

    let now = utc_now();

    sqlx::query(
        "UPDATE progress_reports SET activity_id = ?, indicator_id = ?, period_type = ?, \
         period = ?, current_value = ?, target_value = ?, execution_percentage = ?, \
         comments = ?, challenges = ?, next_steps = ?, updated_at = ? WHERE id = ?",
    )
    .bind(activity_id.map(|id| id.to_string()))
    .bind(indicator_id.map(|id| id.to_string()))
    .bind(&period_type)
    .bind(&period)
    .bind(current_value)
    .bind(target_value)
    .bind(percentage)
    .bind(req.comments.as_ref().or(existing.comments.as_ref()))
    .bind(req.challenges.as_ref().or(existing.challenges.as_ref()))
    .bind(req.next_steps.as_ref().or(existing.next_steps.as_ref()))
    .bind(now)
    .bind(report_id.to_string())
    .execute(&state.pool)
    .await?;

    let report = fetch_report(state, report_id).await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(actor.user_id),
        &report,
        Some(&existing),
        context,
    );

    Ok(report)
}

/// Runs one workflow transition end to end.
///
/// The status update is a compare-and-set on the status read at the start;
/// when a concurrent transition won the race, the update matches zero rows
/// and this attempt fails with `invalid_transition` against the fresh
/// status. Exactly one of two racing decisions can ever commit.
pub async fn execute_transition(
    state: &AppState,
    report_id: Uuid,
    action: TransitionAction,
    actor: &Principal,
    comment: Option<String>,
    context: Option<RequestContext>,
) -> Result<TransitionOutcome, AppError> {
    let report = fetch_report(state, report_id).await?;

    // A ledger that does not reproduce the stored status freezes the
    // report before any legality or permission checks run.
    let history = ledger::history_for(&state.pool, report_id).await?;
    ledger::verify(report_id, report.status, &history)?;

    let next = lifecycle::next_status(report.status, action)?;

    state
        .evaluator
        .authorize_any(actor, lifecycle::required_permissions(action))
        .into_result()?;

    match lifecycle::actor_rule(action) {
        ActorRule::CreatorOnly if report.reported_by != actor.user_id => {
            return Err(AppError::forbidden(format!(
                "only the reporting user can {action} this report"
            )));
        }
        ActorRule::NotCreator if report.reported_by == actor.user_id => {
            return Err(AppError::SelfApproval);
        }
        _ => {}
    }

    let now = utc_now();
    let mut tx = state.pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE progress_reports SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(next.as_str())
    .bind(now)
    .bind(report_id.to_string())
    .bind(report.status.as_str())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        let fresh = fetch_report(state, report_id).await?;
        return Err(AppError::InvalidTransition {
            from: fresh.status.to_string(),
            action: action.to_string(),
        });
    }

    let entry = ledger::append(
        &mut tx,
        report_id,
        lifecycle::ledger_action(action),
        actor.user_id,
        comment.as_deref(),
        now,
    )
    .await?;

    tx.commit().await?;

    let report = fetch_report(state, report_id).await?;

    match action {
        TransitionAction::Submit => notify_approvers(state, actor, &report, false).await,
        TransitionAction::Resubmit => notify_approvers(state, actor, &report, true).await,
        TransitionAction::Approve => {
            let message = format!(
                "Your {} report for {} was approved by {}",
                report.period_type, report.period, actor.name
            );
            state
                .notifier
                .notify(
                    &[report.reported_by],
                    "Progress report approved",
                    &message,
                    Severity::Important,
                )
                .await;
        }
        TransitionAction::Reject => {
            let message = match comment.as_deref() {
                Some(reason) => format!(
                    "Your {} report for {} was rejected by {}: {}",
                    report.period_type, report.period, actor.name, reason
                ),
                None => format!(
                    "Your {} report for {} was rejected by {}",
                    report.period_type, report.period, actor.name
                ),
            };
            state
                .notifier
                .notify(
                    &[report.reported_by],
                    "Progress report rejected",
                    &message,
                    Severity::Critical,
                )
                .await;
        }
    }

    log_activity_with_context(
        &state.event_bus,
        lifecycle::log_verb(action),
        Some(actor.user_id),
        &report,
        None,
        context,
    );

    Ok(TransitionOutcome { report, entry })
}

async fn notify_approvers(state: &AppState, actor: &Principal, report: &ProgressReport, resubmission: bool) {
    let targets = match approver_ids(state, actor.user_id).await {
        Ok(targets) => targets,
        Err(e) => {
            tracing::warn!("could not resolve approver targets: {}", e);
            return;
        }
    };
    if targets.is_empty() {
        return;
    }

    let (title, message) = if resubmission {
        (
            "Progress report resubmitted",
            format!(
                "{} resubmitted a {} report for {}",
                actor.name, report.period_type, report.period
            ),
        )
    } else {
        (
            "Progress report submitted",
            format!(
                "{} submitted a {} report for {}",
                actor.name, report.period_type, report.period
            ),
        )
    };

    state
        .notifier
        .notify(&targets, title, &message, Severity::Important)
        .await;
}

/// Active users whose role grants `approve:progress-report`, minus the
/// submitting user.
async fn approver_ids(state: &AppState, exclude: Uuid) -> Result<Vec<Uuid>, AppError> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT u.id FROM users u \
         INNER JOIN role_permissions rp ON rp.role_id = u.role_id \
         INNER JOIN permissions p ON p.id = rp.permission_id \
         WHERE p.action = 'approve' AND p.resource = 'progress-report' \
           AND u.active = 1 AND u.id != ?",
    )
    .bind(exclude.to_string())
    .fetch_all(&state.pool)
    .await?;

    Ok(ids
        .iter()
        .filter_map(|raw| Uuid::parse_str(raw).ok())
        .collect())
}

/// Exactly-one-target rule, shared by create and edit. `required` controls
/// whether a missing target is an error (create) or impossible by
/// construction (edit keeps the current target when none is named).
async fn validate_target(
    state: &AppState,
    activity_id: Option<Uuid>,
    indicator_id: Option<Uuid>,
    required: bool,
) -> Result<(), AppError> {
    match (activity_id, indicator_id) {
        (Some(_), Some(_)) => Err(AppError::bad_request(
            "a report must reference exactly one of activity_id or indicator_id",
        )),
        (None, None) if required => Err(AppError::bad_request(
            "a report must reference exactly one of activity_id or indicator_id",
        )),
        (None, None) => Ok(()),
        (Some(activity), None) => {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM activities WHERE id = ?")
                    .bind(activity.to_string())
                    .fetch_optional(&state.pool)
                    .await?;
            exists
                .map(|_| ())
                .ok_or_else(|| AppError::not_found("Activity not found"))
        }
        (None, Some(indicator)) => {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM indicators WHERE id = ?")
                    .bind(indicator.to_string())
                    .fetch_optional(&state.pool)
                    .await?;
            exists
                .map(|_| ())
                .ok_or_else(|| AppError::not_found("Indicator not found"))
        }
    }
}

fn derived_percentage(current: Option<f64>, target: Option<f64>) -> Option<f64> {
    match (current, target) {
        (Some(current), Some(target)) => execution_percentage(current, target),
        _ => None,
    }
}
