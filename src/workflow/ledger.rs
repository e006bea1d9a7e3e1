//! Append-only approval history.
//!
//! Every lifecycle event a report goes through lands here exactly once, in
//! commit order. The ledger is never updated or deleted; replaying it must
//! reproduce the status stored on the report row. A mismatch means the two
//! tables diverged and the report is frozen with a data integrity fault
//! until someone looks at it.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::report::{ApprovalAction, ApprovalHistoryEntry, DbApprovalHistoryEntry, ReportStatus};

/// Appends one entry inside the caller's transaction and returns it with
/// the sequence number the database assigned.
pub async fn append(
    tx: &mut Transaction<'_, Sqlite>,
    report_id: Uuid,
    action: ApprovalAction,
    actor_id: Uuid,
    comment: Option<&str>,
    at: DateTime<Utc>,
) -> Result<ApprovalHistoryEntry, AppError> {
    let entry_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO approval_history (id, report_id, action, actor_id, comment, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(entry_id.to_string())
    .bind(report_id.to_string())
    .bind(action.as_str())
    .bind(actor_id.to_string())
    .bind(comment)
    .bind(at)
    .execute(&mut **tx)
    .await?;

    let row = sqlx::query_as::<_, DbApprovalHistoryEntry>(
        "SELECT seq, id, report_id, action, actor_id, comment, created_at
         FROM approval_history WHERE id = ?",
    )
    .bind(entry_id.to_string())
    .fetch_one(&mut **tx)
    .await?;

    row.try_into()
}

/// Full history of one report, oldest first.
pub async fn history_for(
    pool: &SqlitePool,
    report_id: Uuid,
) -> Result<Vec<ApprovalHistoryEntry>, AppError> {
    let rows = sqlx::query_as::<_, DbApprovalHistoryEntry>(
        "SELECT seq, id, report_id, action, actor_id, comment, created_at
         FROM approval_history WHERE report_id = ? ORDER BY seq ASC",
    )
    .bind(report_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Folds one ledger action into the state derived so far. `None` as input
/// state means "no report yet"; `None` as output means the pair is illegal.
fn apply(state: Option<ReportStatus>, action: ApprovalAction) -> Option<ReportStatus> {
    match (state, action) {
        (None, ApprovalAction::Created) => Some(ReportStatus::Draft),
        // SUBMITTED may open a ledger or follow a draft; direct submission
        // writes CREATED + SUBMITTED in one transaction.
        (None | Some(ReportStatus::Draft), ApprovalAction::Submitted) => {
            Some(ReportStatus::Submitted)
        }
        (Some(ReportStatus::Rejected), ApprovalAction::Resubmitted) => {
            Some(ReportStatus::Submitted)
        }
        (Some(ReportStatus::Submitted), ApprovalAction::Approved) => Some(ReportStatus::Approved),
        (Some(ReportStatus::Submitted), ApprovalAction::Rejected) => Some(ReportStatus::Rejected),
        _ => None,
    }
}

/// Replays a ledger from the beginning. Returns the derived status, or
/// `None` when the sequence is empty or contains an illegal step.
pub fn replay(actions: &[ApprovalAction]) -> Option<ReportStatus> {
    if actions.is_empty() {
        return None;
    }
    let mut state = None;
    for action in actions {
        state = Some(apply(state, *action)?);
    }
    state
}

/// Checks that the ledger reproduces the stored status. Called before any
/// transition is attempted; a fault here blocks the workflow.
pub fn verify(
    report_id: Uuid,
    stored: ReportStatus,
    entries: &[ApprovalHistoryEntry],
) -> Result<(), AppError> {
    let actions: Vec<ApprovalAction> = entries.iter().map(|e| e.action).collect();
    match replay(&actions) {
        Some(derived) if derived == stored => Ok(()),
        Some(derived) => Err(AppError::data_integrity(format!(
            "report {report_id}: ledger replays to {derived} but stored status is {stored}"
        ))),
        None => Err(AppError::data_integrity(format!(
            "report {report_id}: approval history is empty or contains an illegal step"
        ))),
    }
}
